//! Named program parameters and their device-side block layout.
//!
//! Every compute program declares an ordered list of named parameters. The
//! list becomes both a generated WGSL `Params` struct and a byte block laid
//! out with WGSL uniform alignment rules, so `set_uniform("delta_time", dt)`
//! on the host lands exactly where the shader reads `params.delta_time`.
//!
//! # Example
//!
//! ```ignore
//! let layout = UniformLayout::new(&[
//!     ("delta_time", UniformKind::F32),
//!     ("gravity", UniformKind::Bool),
//! ]);
//! let mut block = ParamBlock::new(layout);
//! block.set("delta_time", 0.016f32.into());
//! assert_eq!(block.f32("delta_time"), 0.016);
//! ```

use glam::{Mat4, Vec3, Vec4};

/// Supported parameter value types.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(f32),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    /// The declared kind this value can be written into.
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Bool(_) => UniformKind::Bool,
            UniformValue::I32(_) => UniformKind::I32,
            UniformValue::U32(_) => UniformKind::U32,
            UniformValue::F32(_) => UniformKind::F32,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
            UniformValue::Mat4(_) => UniformKind::Mat4,
        }
    }

    /// Write this value to `buf`, which must be exactly `kind().size()` bytes.
    fn write_bytes(&self, buf: &mut [u8]) {
        match self {
            UniformValue::Bool(v) => buf.copy_from_slice(&(*v as u32).to_le_bytes()),
            UniformValue::I32(v) => buf.copy_from_slice(&v.to_le_bytes()),
            UniformValue::U32(v) => buf.copy_from_slice(&v.to_le_bytes()),
            UniformValue::F32(v) => buf.copy_from_slice(&v.to_le_bytes()),
            UniformValue::Vec3(v) => buf.copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Vec4(v) => buf.copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Mat4(m) => buf.copy_from_slice(bytemuck::bytes_of(m)),
        }
    }
}

impl From<bool> for UniformValue {
    fn from(v: bool) -> Self {
        UniformValue::Bool(v)
    }
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::F32(v)
    }
}

impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        UniformValue::I32(v)
    }
}

impl From<u32> for UniformValue {
    fn from(v: u32) -> Self {
        UniformValue::U32(v)
    }
}

impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        UniformValue::Mat4(v)
    }
}

/// Declared type of a program parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformKind {
    /// Stored as `u32` (WGSL has no host-shareable `bool`).
    Bool,
    I32,
    U32,
    F32,
    Vec3,
    Vec4,
    Mat4,
}

impl UniformKind {
    /// WGSL type used in the generated struct.
    pub fn wgsl_type(&self) -> &'static str {
        match self {
            UniformKind::Bool | UniformKind::U32 => "u32",
            UniformKind::I32 => "i32",
            UniformKind::F32 => "f32",
            UniformKind::Vec3 => "vec3<f32>",
            UniformKind::Vec4 => "vec4<f32>",
            UniformKind::Mat4 => "mat4x4<f32>",
        }
    }

    /// Byte size without trailing padding.
    pub fn size(&self) -> usize {
        match self {
            UniformKind::Bool | UniformKind::I32 | UniformKind::U32 | UniformKind::F32 => 4,
            UniformKind::Vec3 => 12,
            UniformKind::Vec4 => 16,
            UniformKind::Mat4 => 64,
        }
    }

    /// Required alignment in the uniform address space.
    pub fn align(&self) -> usize {
        match self {
            UniformKind::Bool | UniformKind::I32 | UniformKind::U32 | UniformKind::F32 => 4,
            UniformKind::Vec3 | UniformKind::Vec4 | UniformKind::Mat4 => 16,
        }
    }
}

/// One named field of a [`UniformLayout`].
#[derive(Clone, Debug, PartialEq)]
pub struct UniformField {
    pub name: &'static str,
    pub kind: UniformKind,
    pub offset: usize,
}

/// Ordered parameter declaration with computed offsets.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformLayout {
    fields: Vec<UniformField>,
    size: usize,
}

impl UniformLayout {
    /// Lay out `decls` in order. A scalar may sit in the trailing bytes of a
    /// preceding `vec3`, as WGSL allows.
    pub fn new(decls: &[(&'static str, UniformKind)]) -> Self {
        let mut fields = Vec::with_capacity(decls.len());
        let mut cursor = 0usize;
        for &(name, kind) in decls {
            let offset = cursor.next_multiple_of(kind.align());
            fields.push(UniformField { name, kind, offset });
            cursor = offset + kind.size();
        }
        // Uniform structs round up to 16 bytes; an empty block still needs a word.
        let size = cursor.max(4).next_multiple_of(16);
        Self { fields, size }
    }

    /// Total block size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&UniformField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Generate the WGSL struct definition for this layout.
    pub fn wgsl_struct(&self, struct_name: &str) -> String {
        let mut out = format!("struct {struct_name} {{\n");
        if self.fields.is_empty() {
            out.push_str("    _unused: u32,\n");
        }
        for field in &self.fields {
            out.push_str(&format!("    {}: {},\n", field.name, field.kind.wgsl_type()));
        }
        out.push_str("};\n");
        out
    }
}

/// Why a [`ParamBlock::set`] was not applied.
#[derive(Clone, Debug, PartialEq)]
pub enum SetOutcome {
    Applied,
    /// The program declares no parameter of this name.
    UnknownName,
    /// The value's type does not match the declaration.
    KindMismatch { declared: UniformKind, given: UniformKind },
}

/// Byte block holding current parameter values for one program.
#[derive(Clone, Debug)]
pub struct ParamBlock {
    layout: UniformLayout,
    bytes: Vec<u8>,
}

impl ParamBlock {
    /// Create a zeroed block.
    pub fn new(layout: UniformLayout) -> Self {
        let bytes = vec![0u8; layout.size()];
        Self { layout, bytes }
    }

    /// Write a value by name.
    pub fn set(&mut self, name: &str, value: UniformValue) -> SetOutcome {
        let Some(field) = self.layout.field(name) else {
            return SetOutcome::UnknownName;
        };
        if field.kind != value.kind() {
            return SetOutcome::KindMismatch {
                declared: field.kind,
                given: value.kind(),
            };
        }
        let range = field.offset..field.offset + field.kind.size();
        value.write_bytes(&mut self.bytes[range]);
        SetOutcome::Applied
    }

    /// Raw bytes for upload.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The layout backing this block.
    pub fn layout(&self) -> &UniformLayout {
        &self.layout
    }

    fn word(&self, name: &str, kind: UniformKind) -> Option<[u8; 4]> {
        let field = self.layout.field(name).filter(|f| f.kind == kind)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.bytes[field.offset..field.offset + 4]);
        Some(word)
    }

    /// Read an `f32` parameter; unset or undeclared reads as zero.
    pub fn f32(&self, name: &str) -> f32 {
        self.word(name, UniformKind::F32).map(f32::from_le_bytes).unwrap_or(0.0)
    }

    /// Read a `u32` parameter; unset or undeclared reads as zero.
    pub fn u32(&self, name: &str) -> u32 {
        self.word(name, UniformKind::U32).map(u32::from_le_bytes).unwrap_or(0)
    }

    /// Read an `i32` parameter; unset or undeclared reads as zero.
    pub fn i32(&self, name: &str) -> i32 {
        self.word(name, UniformKind::I32).map(i32::from_le_bytes).unwrap_or(0)
    }

    /// Read a `bool` parameter; unset or undeclared reads as false.
    pub fn bool(&self, name: &str) -> bool {
        self.word(name, UniformKind::Bool)
            .map(|w| u32::from_le_bytes(w) != 0)
            .unwrap_or(false)
    }

    /// Read a `vec3` parameter; unset or undeclared reads as zero.
    pub fn vec3(&self, name: &str) -> Vec3 {
        match self.layout.field(name) {
            Some(f) if f.kind == UniformKind::Vec3 => {
                bytemuck::pod_read_unaligned::<Vec3>(&self.bytes[f.offset..f.offset + 12])
            }
            _ => Vec3::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_pack_after_vec3() {
        let layout = UniformLayout::new(&[
            ("origin", UniformKind::Vec3),
            ("strength", UniformKind::F32),
            ("radius", UniformKind::Vec3),
        ]);
        assert_eq!(layout.field("origin").unwrap().offset, 0);
        assert_eq!(layout.field("strength").unwrap().offset, 12);
        assert_eq!(layout.field("radius").unwrap().offset, 16);
        assert_eq!(layout.size(), 32);
    }

    #[test]
    fn vec3_after_scalar_is_realigned() {
        let layout = UniformLayout::new(&[
            ("count", UniformKind::U32),
            ("origin", UniformKind::Vec3),
            ("view", UniformKind::Mat4),
        ]);
        assert_eq!(layout.field("origin").unwrap().offset, 16);
        assert_eq!(layout.field("view").unwrap().offset, 32);
        assert_eq!(layout.size(), 96);
    }

    #[test]
    fn empty_layout_still_has_size() {
        let layout = UniformLayout::new(&[]);
        assert_eq!(layout.size(), 16);
        assert!(layout.wgsl_struct("Params").contains("_unused"));
    }

    #[test]
    fn wgsl_struct_lists_fields_in_order() {
        let layout = UniformLayout::new(&[
            ("delta_time", UniformKind::F32),
            ("gravity", UniformKind::Bool),
        ]);
        let wgsl = layout.wgsl_struct("Params");
        let dt = wgsl.find("delta_time: f32").unwrap();
        let gravity = wgsl.find("gravity: u32").unwrap();
        assert!(dt < gravity);
    }

    #[test]
    fn block_round_trips_values() {
        let layout = UniformLayout::new(&[
            ("delta_time", UniformKind::F32),
            ("gravity", UniformKind::Bool),
            ("max_particles", UniformKind::U32),
            ("origin", UniformKind::Vec3),
            ("offset", UniformKind::I32),
        ]);
        let mut block = ParamBlock::new(layout);
        assert_eq!(block.set("delta_time", 0.5f32.into()), SetOutcome::Applied);
        assert_eq!(block.set("offset", (-3i32).into()), SetOutcome::Applied);
        assert_eq!(block.set("gravity", true.into()), SetOutcome::Applied);
        assert_eq!(block.set("max_particles", 64u32.into()), SetOutcome::Applied);
        assert_eq!(
            block.set("origin", Vec3::new(1.0, 2.0, 3.0).into()),
            SetOutcome::Applied
        );

        assert_eq!(block.f32("delta_time"), 0.5);
        assert!(block.bool("gravity"));
        assert_eq!(block.u32("max_particles"), 64);
        assert_eq!(block.vec3("origin"), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(block.i32("offset"), -3);
        // Reading with the wrong type gives the zero value.
        assert_eq!(block.u32("offset"), 0);
    }

    #[test]
    fn unknown_and_mismatched_sets_are_rejected() {
        let layout = UniformLayout::new(&[("delta_time", UniformKind::F32)]);
        let mut block = ParamBlock::new(layout);
        assert_eq!(block.set("nope", 1.0f32.into()), SetOutcome::UnknownName);
        assert_eq!(
            block.set("delta_time", 1u32.into()),
            SetOutcome::KindMismatch {
                declared: UniformKind::F32,
                given: UniformKind::U32
            }
        );
        assert_eq!(block.f32("delta_time"), 0.0);
    }
}
