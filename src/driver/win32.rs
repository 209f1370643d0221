//! Windows backend: SetupAPI device lookup and overlapped `DeviceIoControl`.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use std::ffi::c_void;
use std::io;
use std::mem;
use std::ptr;
use std::slice;
use std::time::Duration;

use tracing::debug;
use windows_sys::core::GUID;
use windows_sys::Win32::Devices::DeviceAndDriverInstallation::{
    CM_Get_DevNode_Status, SetupDiDestroyDeviceInfoList, SetupDiEnumDeviceInfo,
    SetupDiEnumDeviceInterfaces, SetupDiGetClassDevsW, SetupDiGetDeviceInterfaceDetailW,
    SetupDiGetDeviceRegistryPropertyW, CR_SUCCESS, DIGCF_DEVICEINTERFACE, DIGCF_PRESENT,
    HDEVINFO, SPDRP_HARDWAREID, SP_DEVICE_INTERFACE_DATA, SP_DEVICE_INTERFACE_DETAIL_DATA_W,
    SP_DEVINFO_DATA,
};
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_IO_PENDING, GENERIC_READ, GENERIC_WRITE, HANDLE,
    INVALID_HANDLE_VALUE, WAIT_TIMEOUT,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_FLAG_NO_BUFFERING, FILE_FLAG_OVERLAPPED,
    FILE_FLAG_WRITE_THROUGH, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::Threading::CreateEventW;
use windows_sys::Win32::System::IO::{
    CancelIoEx, DeviceIoControl, GetOverlappedResult, GetOverlappedResultEx, OVERLAPPED,
};

use super::{
    parse_multi_sz, DeviceControl, DeviceStatus, Driver, DriverError, IoControl, ADAPTER_GUID,
    ADAPTER_NAME, CLASS_GUID, HARDWARE_ID, IO_INPUT_SIZE,
};

fn is_valid(handle: HANDLE) -> bool {
    !handle.is_null() && handle != INVALID_HANDLE_VALUE
}

/// The Parsec virtual display driver.
#[derive(Debug, Default)]
pub struct ParsecDriver;

impl Driver for ParsecDriver {
    type Device = DeviceHandle;

    fn query_readiness(&self) -> DeviceStatus {
        query_status(&GUID::from_u128(CLASS_GUID), HARDWARE_ID)
    }

    fn open(&self) -> Result<DeviceHandle, DriverError> {
        open_interface(&GUID::from_u128(ADAPTER_GUID))
    }
}

// ============================================================================
// Device information sets
// ============================================================================

/// Owned SetupAPI device information set.
struct DevInfoList(HDEVINFO);

impl DevInfoList {
    fn present(guid: &GUID, flags: u32) -> Option<Self> {
        let set = unsafe { SetupDiGetClassDevsW(guid, ptr::null(), ptr::null_mut(), flags) };
        if set as isize == INVALID_HANDLE_VALUE as isize {
            None
        } else {
            Some(Self(set))
        }
    }
}

impl Drop for DevInfoList {
    fn drop(&mut self) {
        unsafe {
            SetupDiDestroyDeviceInfoList(self.0);
        }
    }
}

/// Hardware ids registered for one device.
fn hardware_ids(list: &DevInfoList, info: &SP_DEVINFO_DATA) -> Option<Vec<String>> {
    let mut required = 0u32;
    unsafe {
        SetupDiGetDeviceRegistryPropertyW(
            list.0,
            info,
            SPDRP_HARDWAREID,
            ptr::null_mut(),
            ptr::null_mut(),
            0,
            &mut required,
        );
    }
    if required == 0 {
        return None;
    }

    let mut buf = vec![0u16; (required as usize).div_ceil(2)];
    let ok = unsafe {
        SetupDiGetDeviceRegistryPropertyW(
            list.0,
            info,
            SPDRP_HARDWAREID,
            ptr::null_mut(),
            buf.as_mut_ptr().cast(),
            (buf.len() * 2) as u32,
            &mut required,
        )
    };
    (ok != 0).then(|| parse_multi_sz(&buf))
}

fn query_status(class: &GUID, hardware_id: &str) -> DeviceStatus {
    let Some(list) = DevInfoList::present(class, DIGCF_PRESENT) else {
        return DeviceStatus::Inaccessible;
    };

    for index in 0.. {
        let mut info: SP_DEVINFO_DATA = unsafe { mem::zeroed() };
        info.cbSize = mem::size_of::<SP_DEVINFO_DATA>() as u32;
        if unsafe { SetupDiEnumDeviceInfo(list.0, index, &mut info) } == 0 {
            break;
        }

        let Some(ids) = hardware_ids(&list, &info) else {
            continue;
        };
        if !ids.iter().any(|id| id.eq_ignore_ascii_case(hardware_id)) {
            continue;
        }

        let mut status = 0u32;
        let mut problem = 0u32;
        let ret = unsafe { CM_Get_DevNode_Status(&mut status, &mut problem, info.DevInst, 0) };
        if ret != CR_SUCCESS {
            debug!(ret, "CM_Get_DevNode_Status failed");
            return DeviceStatus::NotInstalled;
        }
        return super::classify_devnode(status, problem);
    }

    DeviceStatus::NotInstalled
}

/// NUL-terminated device path for one interface.
fn interface_path(list: &DevInfoList, data: &SP_DEVICE_INTERFACE_DATA) -> Option<Vec<u16>> {
    let mut required = 0u32;
    unsafe {
        SetupDiGetDeviceInterfaceDetailW(
            list.0,
            data,
            ptr::null_mut(),
            0,
            &mut required,
            ptr::null_mut(),
        );
    }

    let offset = mem::offset_of!(SP_DEVICE_INTERFACE_DETAIL_DATA_W, DevicePath);
    if (required as usize) <= offset {
        return None;
    }

    // u32 storage keeps cbSize aligned
    let mut buf = vec![0u32; (required as usize).div_ceil(4)];
    let detail = buf.as_mut_ptr().cast::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>();
    unsafe {
        (*detail).cbSize = mem::size_of::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>() as u32;
        if SetupDiGetDeviceInterfaceDetailW(
            list.0,
            data,
            detail,
            required,
            &mut required,
            ptr::null_mut(),
        ) == 0
        {
            return None;
        }

        let max = (required as usize - offset) / 2;
        let chars = slice::from_raw_parts(ptr::addr_of!((*detail).DevicePath).cast::<u16>(), max);
        let len = chars.iter().position(|&c| c == 0).unwrap_or(max);
        let mut path = chars[..len].to_vec();
        path.push(0);
        Some(path)
    }
}

fn open_interface(interface: &GUID) -> Result<DeviceHandle, DriverError> {
    let list = DevInfoList::present(interface, DIGCF_PRESENT | DIGCF_DEVICEINTERFACE)
        .ok_or(DriverError::DeviceNotFound(ADAPTER_NAME))?;

    let mut last_error = None;
    for index in 0.. {
        let mut data: SP_DEVICE_INTERFACE_DATA = unsafe { mem::zeroed() };
        data.cbSize = mem::size_of::<SP_DEVICE_INTERFACE_DATA>() as u32;
        if unsafe { SetupDiEnumDeviceInterfaces(list.0, ptr::null(), interface, index, &mut data) }
            == 0
        {
            break;
        }

        let Some(path) = interface_path(&list, &data) else {
            continue;
        };

        let handle = unsafe {
            CreateFileW(
                path.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                ptr::null(),
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL
                    | FILE_FLAG_NO_BUFFERING
                    | FILE_FLAG_OVERLAPPED
                    | FILE_FLAG_WRITE_THROUGH,
                ptr::null_mut(),
            )
        };
        if is_valid(handle) {
            return Ok(DeviceHandle(handle));
        }
        last_error = Some(io::Error::last_os_error());
    }

    match last_error {
        Some(e) => Err(DriverError::OpenFailed(e)),
        None => Err(DriverError::DeviceNotFound(ADAPTER_NAME)),
    }
}

// ============================================================================
// Device handle
// ============================================================================

/// Open adapter handle. Closed on drop; an invalid handle is never closed.
pub struct DeviceHandle(HANDLE);

// The handle is only used for overlapped IO, each call with its own OVERLAPPED.
unsafe impl Send for DeviceHandle {}
unsafe impl Sync for DeviceHandle {}

/// Manual-reset event backing one overlapped call.
struct Event(HANDLE);

impl Event {
    fn new() -> io::Result<Self> {
        let handle = unsafe { CreateEventW(ptr::null(), 1, 0, ptr::null()) };
        if handle.is_null() {
            Err(io::Error::last_os_error())
        } else {
            Ok(Self(handle))
        }
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.0);
        }
    }
}

impl DeviceControl for DeviceHandle {
    fn io_control(
        &self,
        code: IoControl,
        input: &[u8; IO_INPUT_SIZE],
        timeout: Duration,
    ) -> Result<u32, DriverError> {
        if !is_valid(self.0) {
            return Err(DriverError::IoControl {
                code,
                source: io::Error::from(io::ErrorKind::NotConnected),
            });
        }

        let event = Event::new().map_err(|source| DriverError::IoControl { code, source })?;
        let mut overlapped: OVERLAPPED = unsafe { mem::zeroed() };
        overlapped.hEvent = event.0;
        let mut output = 0u32;

        let issued = unsafe {
            DeviceIoControl(
                self.0,
                code.code(),
                input.as_ptr().cast::<c_void>(),
                input.len() as u32,
                (&mut output as *mut u32).cast::<c_void>(),
                mem::size_of::<u32>() as u32,
                ptr::null_mut(),
                &mut overlapped,
            )
        };
        if issued == 0 {
            let err = unsafe { GetLastError() };
            if err != ERROR_IO_PENDING {
                return Err(DriverError::IoControl {
                    code,
                    source: io::Error::from_raw_os_error(err as i32),
                });
            }
        }

        let millis = timeout.as_millis().min(u128::from(u32::MAX - 1)) as u32;
        let mut transferred = 0u32;
        let done =
            unsafe { GetOverlappedResultEx(self.0, &overlapped, &mut transferred, millis, 0) };
        if done == 0 {
            let err = unsafe { GetLastError() };
            // Cancel and drain so the driver never writes into a dead frame
            unsafe {
                CancelIoEx(self.0, &overlapped);
                GetOverlappedResult(self.0, &overlapped, &mut transferred, 1);
            }
            if err == WAIT_TIMEOUT {
                return Err(DriverError::Timeout { code, timeout });
            }
            return Err(DriverError::IoControl {
                code,
                source: io::Error::from_raw_os_error(err as i32),
            });
        }

        Ok(output)
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if is_valid(self.0) {
            unsafe {
                CloseHandle(self.0);
            }
        }
    }
}
