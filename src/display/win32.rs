//! Windows backend: GDI display device enumeration and display settings.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use std::mem;
use std::ptr;

use tracing::debug;
use windows_sys::Win32::Graphics::Gdi::{
    ChangeDisplaySettingsExW, EnumDisplayDevicesW, EnumDisplaySettingsW, CDS_UPDATEREGISTRY,
    DEVMODEW, DISPLAY_DEVICEW, DISP_CHANGE_SUCCESSFUL, DM_DISPLAYFREQUENCY, DM_PELSHEIGHT,
    DM_PELSWIDTH, ENUM_CURRENT_SETTINGS,
};

use super::{parse_display_code, DisplayConfigurator, DisplayMode, ModeError};

// Monitor-level state flag and EnumDisplayDevices flag (wingdi.h / winuser.h).
const DISPLAY_DEVICE_ATTACHED: u32 = 0x0000_0002;
const EDD_GET_DEVICE_INTERFACE_NAME: u32 = 0x0000_0001;

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn from_wide(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

fn display_device() -> DISPLAY_DEVICEW {
    let mut device: DISPLAY_DEVICEW = unsafe { mem::zeroed() };
    device.cb = mem::size_of::<DISPLAY_DEVICEW>() as u32;
    device
}

fn devmode() -> DEVMODEW {
    let mut mode: DEVMODEW = unsafe { mem::zeroed() };
    mode.dmSize = mem::size_of::<DEVMODEW>() as u16;
    mode
}

/// Display configuration through `EnumDisplaySettings`/`ChangeDisplaySettingsEx`.
#[derive(Debug, Default)]
pub struct GdiDisplays;

impl DisplayConfigurator for GdiDisplays {
    fn find_output(&self, display_code: &str) -> Option<String> {
        for i in 0.. {
            let mut adapter = display_device();
            if unsafe { EnumDisplayDevicesW(ptr::null(), i, &mut adapter, 0) } == 0 {
                break;
            }

            for j in 0.. {
                let mut monitor = display_device();
                let found = unsafe {
                    EnumDisplayDevicesW(
                        adapter.DeviceName.as_ptr(),
                        j,
                        &mut monitor,
                        EDD_GET_DEVICE_INTERFACE_NAME,
                    )
                };
                if found == 0 {
                    break;
                }
                if monitor.StateFlags & DISPLAY_DEVICE_ATTACHED == 0 {
                    continue;
                }

                let device_id = from_wide(&monitor.DeviceID);
                if parse_display_code(&device_id).eq_ignore_ascii_case(display_code) {
                    let output = from_wide(&adapter.DeviceName);
                    debug!(%output, %device_id, "Matched virtual output");
                    return Some(output);
                }
            }
        }
        None
    }

    fn enumerate_modes<'a>(
        &'a self,
        output: &'a str,
    ) -> Box<dyn Iterator<Item = DisplayMode> + 'a> {
        Box::new(ModeIter {
            device: to_wide(output),
            index: 0,
        })
    }

    fn apply(&self, output: &str, mode: DisplayMode) -> Result<(), ModeError> {
        let name = to_wide(output);
        let mut settings = devmode();
        if unsafe { EnumDisplaySettingsW(name.as_ptr(), ENUM_CURRENT_SETTINGS, &mut settings) } == 0
        {
            return Err(ModeError::OutputNotFound(output.to_string()));
        }

        settings.dmPelsWidth = mode.width;
        settings.dmPelsHeight = mode.height;
        settings.dmDisplayFrequency = mode.refresh;
        settings.dmFields |= DM_PELSWIDTH | DM_PELSHEIGHT | DM_DISPLAYFREQUENCY;

        let code = unsafe {
            ChangeDisplaySettingsExW(
                name.as_ptr(),
                &settings,
                ptr::null_mut(),
                CDS_UPDATEREGISTRY,
                ptr::null(),
            )
        };
        if code != DISP_CHANGE_SUCCESSFUL {
            return Err(ModeError::Rejected {
                output: output.to_string(),
                code,
            });
        }
        Ok(())
    }
}

/// Lazily walks the mode list of one output.
struct ModeIter {
    device: Vec<u16>,
    index: u32,
}

impl Iterator for ModeIter {
    type Item = DisplayMode;

    fn next(&mut self) -> Option<DisplayMode> {
        let mut settings = devmode();
        if unsafe { EnumDisplaySettingsW(self.device.as_ptr(), self.index, &mut settings) } == 0 {
            return None;
        }
        self.index += 1;
        Some(DisplayMode::new(
            settings.dmPelsWidth,
            settings.dmPelsHeight,
            settings.dmDisplayFrequency,
        ))
    }
}
