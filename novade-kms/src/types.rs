//! Plain value types shared by the presentation paths.

use std::fmt;

macro_rules! kernel_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

kernel_id!(
    /// GEM handle of a kernel buffer (dumb buffer or GPU buffer object).
    BufferHandle
);
kernel_id!(
    /// Id of a kernel framebuffer object.
    FramebufferId
);
kernel_id!(
    /// Id of the CRTC scanning out to the output.
    CrtcId
);
kernel_id!(
    /// Id of the physical connector.
    ConnectorId
);

/// Full CRTC timings of a display mode, as the kernel expects them in a mode-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModeTimings {
    pub clock: u32,
    pub hsync_start: u16,
    pub hsync_end: u16,
    pub htotal: u16,
    pub hskew: u16,
    pub vsync_start: u16,
    pub vsync_end: u16,
    pub vtotal: u16,
    pub vscan: u16,
    pub flags: u32,
    pub mode_type: u32,
}

/// An active display mode, already chosen by the mode-selection code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMode {
    pub width: u16,
    pub height: u16,
    pub refresh: u32,
    pub timings: ModeTimings,
    pub name: String,
}

impl DisplayMode {
    /// A mode with only its visible size and refresh rate filled in.
    pub fn new(width: u16, height: u16, refresh: u32) -> Self {
        Self {
            width,
            height,
            refresh,
            timings: ModeTimings::default(),
            name: format!("{}x{}", width, height),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (u32::from(self.width), u32::from(self.height))
    }
}

/// The physical output a window is presented on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub crtc: CrtcId,
    pub connector: ConnectorId,
    pub mode: DisplayMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Pixel format of the window framebuffer. Dumb buffers are always scanned out as 32bpp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Argb8888,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Argb8888 => 4,
        }
    }
}

/// A CPU-side surface holding a software-rendered frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftwareSurface {
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub format: PixelFormat,
    pub pixels: Vec<u8>,
}

impl SoftwareSurface {
    /// Allocates a zeroed surface with a tightly packed pitch.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let pitch = width * format.bytes_per_pixel();
        Self {
            width,
            height,
            pitch,
            format,
            pixels: vec![0; pitch as usize * height as usize],
        }
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.format.bytes_per_pixel()
    }

    /// Bytes of visible pixels in one row, not counting pitch padding.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.bytes_per_pixel() as usize
    }

    /// Whether `pixels` holds every visible row at the declared pitch.
    pub fn is_well_formed(&self) -> bool {
        let row_bytes = self.row_bytes();
        if (self.pitch as usize) < row_bytes {
            return false;
        }
        if self.height == 0 {
            return true;
        }
        (self.height as usize - 1)
            .checked_mul(self.pitch as usize)
            .and_then(|start| start.checked_add(row_bytes))
            .map_or(false, |needed| self.pixels.len() >= needed)
    }

    /// The visible pixels of row `y`. Panics if the surface is not well formed.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.pitch as usize;
        &self.pixels[start..start + self.row_bytes()]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.pitch as usize;
        let end = start + self.row_bytes();
        &mut self.pixels[start..end]
    }
}
