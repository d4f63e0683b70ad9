// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use tracing::info;

/// Host-side view of the window surface: framebuffer size plus the
/// conditions under which rendering should stop (minimized, occluded).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceState {
    width: u32,
    height: u32,
    occluded: bool,
}

impl SurfaceState {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            occluded: false,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_zero_sized(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn paused(&self) -> bool {
        self.occluded || self.is_zero_sized()
    }

    /// Returns true when the paused state flipped.
    pub fn resized(&mut self, width: u32, height: u32) -> bool {
        let was = self.paused();
        self.width = width;
        self.height = height;
        let now = self.paused();
        if was != now {
            info!("Resized → {}x{} (paused={})", width, height, now);
        }
        was != now
    }

    pub fn set_occluded(&mut self, occluded: bool) -> bool {
        let was = self.paused();
        self.occluded = occluded;
        let now = self.paused();
        if was != now {
            info!("Occluded={} → paused={}", occluded, now);
        }
        was != now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimize_pauses_and_restore_resumes() {
        let mut s = SurfaceState::new(1280, 720);
        assert!(!s.paused());
        assert!(s.resized(0, 0));
        assert!(s.paused() && s.is_zero_sized());
        assert!(s.resized(800, 600));
        assert!(!s.paused());
        assert_eq!(s.size(), (800, 600));
    }

    #[test]
    fn one_zero_axis_is_enough_to_pause() {
        let mut s = SurfaceState::new(1280, 720);
        s.resized(1280, 0);
        assert!(s.paused());
    }

    #[test]
    fn occlusion_pauses_without_touching_size() {
        let mut s = SurfaceState::new(640, 480);
        assert!(s.set_occluded(true));
        assert!(s.paused());
        assert!(!s.is_zero_sized());
        assert!(!s.resized(320, 240), "still occluded, no flip");
        assert!(s.set_occluded(false));
        assert!(!s.paused());
    }
}
