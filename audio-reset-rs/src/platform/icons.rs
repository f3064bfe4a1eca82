//! Icon generation utilities.
//!
//! Generates the status-colored tray icons.

/// Icon size in pixels.
pub const ICON_SIZE: u32 = 32;

/// What the tray icon shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconStatus {
    /// Reset in progress (amber)
    Working,

    /// Reset finished (green)
    Complete,

    /// Reset failed or was cancelled (red)
    Failed,
}

impl IconStatus {
    fn color(&self) -> (u8, u8, u8) {
        match self {
            IconStatus::Working => (230, 160, 30),
            IconStatus::Complete => (60, 180, 60),
            IconStatus::Failed => (220, 60, 60),
        }
    }
}

/// Generate a tray icon for `status`.
#[cfg(windows)]
pub fn create_status_icon(status: IconStatus) -> Result<tray_icon::Icon, String> {
    let rgba = generate_status_icon(status);
    tray_icon::Icon::from_rgba(rgba, ICON_SIZE, ICON_SIZE).map_err(|e| e.to_string())
}

/// Generate a status icon as RGBA data.
pub fn generate_status_icon(status: IconStatus) -> Vec<u8> {
    let size = ICON_SIZE as usize;
    let mut rgba = vec![0u8; size * size * 4];

    let center = size as f32 / 2.0;
    let radius = size as f32 / 2.0 - 3.0;
    let (r, g, b) = status.color();

    // Draw filled circle
    for y in 0..size {
        for x in 0..size {
            let idx = (y * size + x) * 4;
            let dx = x as f32 - center;
            let dy = y as f32 - center;
            let dist = (dx * dx + dy * dy).sqrt();

            if dist < radius {
                rgba[idx] = r;
                rgba[idx + 1] = g;
                rgba[idx + 2] = b;
                rgba[idx + 3] = 255;
            } else if dist < radius + 1.0 {
                // Anti-aliased edge
                let alpha = ((radius + 1.0 - dist) * 255.0) as u8;
                rgba[idx] = r;
                rgba[idx + 1] = g;
                rgba[idx + 2] = b;
                rgba[idx + 3] = alpha;
            }
        }
    }

    draw_speaker_shape(&mut rgba, size);

    if status == IconStatus::Failed {
        draw_strike_through(&mut rgba, size);
    }

    rgba
}

/// Draw a simplified speaker: a box and a flared cone.
fn draw_speaker_shape(rgba: &mut [u8], size: usize) {
    let box_left = size * 5 / 16;
    let box_right = size * 7 / 16;
    let center_y = size / 2;

    for x in box_left..(size * 11 / 16) {
        // The cone widens to the right of the box.
        let half_height = if x < box_right {
            size / 8
        } else {
            size / 8 + (x - box_right) / 2
        };
        for y in (center_y - half_height)..(center_y + half_height) {
            paint_white(rgba, size, x, y);
        }
    }
}

/// Draw a diagonal strike-through line.
fn draw_strike_through(rgba: &mut [u8], size: usize) {
    let thickness = 2;

    for i in 4..(size - 4) {
        for t in 0..thickness {
            paint_white(rgba, size, i, i + t);
        }
    }
}

fn paint_white(rgba: &mut [u8], size: usize, x: usize, y: usize) {
    if x < size && y < size {
        let idx = (y * size + x) * 4;
        rgba[idx] = 255;
        rgba[idx + 1] = 255;
        rgba[idx + 2] = 255;
        rgba[idx + 3] = 255;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(rgba: &[u8], x: usize, y: usize) -> &[u8] {
        let idx = (y * ICON_SIZE as usize + x) * 4;
        &rgba[idx..idx + 4]
    }

    #[test]
    fn test_icon_dimensions() {
        let rgba = generate_status_icon(IconStatus::Working);
        assert_eq!(rgba.len(), (ICON_SIZE * ICON_SIZE * 4) as usize);
    }

    #[test]
    fn test_status_colors_and_transparent_corner() {
        let complete = generate_status_icon(IconStatus::Complete);
        assert_eq!(pixel(&complete, 0, 0)[3], 0);
        // Left of the speaker, inside the circle.
        assert_eq!(pixel(&complete, 6, 16), &[60, 180, 60, 255]);

        let working = generate_status_icon(IconStatus::Working);
        assert_eq!(pixel(&working, 6, 16), &[230, 160, 30, 255]);
    }

    #[test]
    fn test_failed_icon_is_struck_through() {
        let failed = generate_status_icon(IconStatus::Failed);
        assert_eq!(pixel(&failed, 8, 8), &[255, 255, 255, 255]);

        let complete = generate_status_icon(IconStatus::Complete);
        assert_ne!(pixel(&complete, 8, 8), &[255, 255, 255, 255]);
    }
}
