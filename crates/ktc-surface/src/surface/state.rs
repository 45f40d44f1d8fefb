use bitflags::bitflags;

use crate::buffer::{BufferRef, Texture};
use crate::region::{Rectangle, Region, Size};
use crate::sync::SyncPoint;

bitflags! {
    /// Which double-buffered fields a commit touched.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Updated: u32 {
        const BUFFER = 1 << 0;
        const DAMAGE = 1 << 1;
        const SCALE = 1 << 2;
        const TRANSFORM = 1 << 3;
        const INPUT = 1 << 4;
        const OPAQUE = 1 << 5;
        const OFFSET = 1 << 6;
        const VIEWPORT = 1 << 7;
        const ACQUIRE = 1 << 8;
    }
}

/// wl_output.transform, in wire order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Transform {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl Transform {
    pub fn from_wire(value: u32) -> Option<Self> {
        Some(match value {
            0 => Transform::Normal,
            1 => Transform::Rotate90,
            2 => Transform::Rotate180,
            3 => Transform::Rotate270,
            4 => Transform::Flipped,
            5 => Transform::Flipped90,
            6 => Transform::Flipped180,
            7 => Transform::Flipped270,
            _ => return None,
        })
    }

    pub fn swaps_axes(self) -> bool {
        matches!(
            self,
            Transform::Rotate90 | Transform::Rotate270 | Transform::Flipped90 | Transform::Flipped270
        )
    }

    pub fn apply_to_size(self, size: Size) -> Size {
        if self.swaps_axes() {
            Size::new(size.height, size.width)
        } else {
            size
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SourceRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub source: Option<SourceRect>,
    pub destination: Option<Size>,
}

pub struct SurfaceState {
    pub buffer: Option<BufferRef>,
    pub buffer_size: Size,
    pub size: Size,
    pub offset: (i32, i32),
    pub scale: i32,
    pub transform: Transform,
    pub damage: Region,
    pub buffer_damage: Region,
    pub input: Region,
    pub opaque: Region,
    pub viewport: Viewport,
    pub updated: Updated,
    pub acquire: Option<SyncPoint>,
    pub release: Option<SyncPoint>,
    pub rejected: bool,
    /// Sampling representation of `buffer`; only maintained on current.
    pub texture: Option<Texture>,
}

impl Default for SurfaceState {
    fn default() -> Self {
        Self {
            buffer: None,
            buffer_size: Size::default(),
            size: Size::default(),
            offset: (0, 0),
            scale: 1,
            transform: Transform::Normal,
            damage: Region::new(),
            buffer_damage: Region::new(),
            input: Region::infinite(),
            opaque: Region::new(),
            viewport: Viewport::default(),
            updated: Updated::empty(),
            acquire: None,
            release: None,
            rejected: false,
            texture: None,
        }
    }
}

impl SurfaceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_content(&self) -> bool {
        self.buffer.is_some() || self.texture.is_some()
    }

    pub fn clamp_buffer_damage(&mut self) {
        self.buffer_damage.intersect(Rectangle::from_size(self.buffer_size));
    }

    /// Logical size: viewport destination, else viewport source, else the
    /// transformed buffer size divided by scale.
    pub fn compute_size(&mut self) {
        // buffer_size outlives the attach, so recommits keep their size
        if self.buffer_size.is_zero() {
            self.size = Size::default();
            return;
        }
        if let Some(dest) = self.viewport.destination {
            self.size = dest;
        } else if let Some(src) = self.viewport.source {
            self.size = Size::new(src.width as i32, src.height as i32);
        } else {
            let size = self.transform.apply_to_size(self.buffer_size);
            let scale = self.scale.max(1);
            self.size = Size::new(size.width / scale, size.height / scale);
        }
    }

    pub fn clamp_damage(&mut self) {
        self.damage.intersect(Rectangle::from_size(self.size));
    }

    /// Everything that changed, in buffer coordinates.
    pub fn accumulated_buffer_damage(&self) -> Region {
        let mut damage = self.buffer_damage.clone();
        if self.damage.is_empty() {
            return damage;
        }
        if self.transform == Transform::Normal && self.viewport == Viewport::default() {
            let mut surface = self.damage.clone();
            surface.scale(self.scale.max(1));
            damage.add_region(&surface);
        } else {
            damage.add(Rectangle::from_size(self.buffer_size));
        }
        damage
    }

    /// Marks the whole buffer damaged.
    pub fn damage_all(&mut self) {
        self.buffer_damage = Region::from_rect(Rectangle::infinite());
        self.updated |= Updated::DAMAGE;
    }

    /// Moves this commit's values into a snapshot. Sticky attributes stay
    /// behind for the next commit, per-commit ones are reset.
    pub fn seal(&mut self) -> SurfaceState {
        let snapshot = SurfaceState {
            buffer: self.buffer.take(),
            buffer_size: self.buffer_size,
            size: self.size,
            offset: self.offset,
            scale: self.scale,
            transform: self.transform,
            damage: std::mem::take(&mut self.damage),
            buffer_damage: std::mem::take(&mut self.buffer_damage),
            input: self.input.clone(),
            opaque: self.opaque.clone(),
            viewport: self.viewport,
            updated: self.updated,
            acquire: self.acquire.take(),
            release: self.release.take(),
            rejected: false,
            texture: None,
        };
        self.discard();
        snapshot
    }

    /// Drops this commit's per-commit values.
    pub fn discard(&mut self) {
        self.buffer = None;
        self.damage.clear();
        self.buffer_damage.clear();
        self.offset = (0, 0);
        self.updated = Updated::empty();
        self.acquire = None;
        self.release = None;
        self.rejected = false;
    }

    /// Applies a snapshot on top of this (current) state.
    pub fn update_from(&mut self, next: SurfaceState) {
        let updated = next.updated;

        if updated.contains(Updated::BUFFER) {
            self.buffer = next.buffer;
            self.buffer_size = next.buffer_size;
            if self.buffer.is_none() {
                self.texture = None;
            }
        }
        self.size = next.size;

        self.offset = next.offset;
        self.damage = next.damage;
        self.buffer_damage = next.buffer_damage;
        self.scale = next.scale;
        self.transform = next.transform;
        self.input = next.input;
        self.opaque = next.opaque;
        self.viewport = next.viewport;
        self.acquire = next.acquire;
        self.release = next.release;
        self.updated = updated;
        self.rejected = false;
    }
}
