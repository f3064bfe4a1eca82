//! Completion message box.

use crate::platform::to_wide;
use windows::core::PCWSTR;
use windows::Win32::Foundation::HWND;
use windows::Win32::UI::WindowsAndMessaging::{
    MessageBoxW, MB_ICONINFORMATION, MB_ICONWARNING, MB_OK, MB_SETFOREGROUND,
};

/// Show a blocking informational box. `warning` switches the icon.
pub fn show_message(title: &str, text: &str, warning: bool) {
    let title_wide = to_wide(title);
    let text_wide = to_wide(text);
    let icon = if warning {
        MB_ICONWARNING
    } else {
        MB_ICONINFORMATION
    };

    unsafe {
        MessageBoxW(
            HWND::default(),
            PCWSTR(text_wide.as_ptr()),
            PCWSTR(title_wide.as_ptr()),
            MB_OK | icon | MB_SETFOREGROUND,
        );
    }
}
