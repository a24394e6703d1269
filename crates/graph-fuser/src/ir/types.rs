use std::fmt;

/// Scalar element kinds carried by tensor values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Bool,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Half,
    Float,
    Double,
}

impl ScalarType {
    /// Short textual name used by the text format (`f32`, `i64`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Byte => "u8",
            ScalarType::Char => "i8",
            ScalarType::Short => "i16",
            ScalarType::Int => "i32",
            ScalarType::Long => "i64",
            ScalarType::Half => "f16",
            ScalarType::Float => "f32",
            ScalarType::Double => "f64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let scalar = match name {
            "bool" => ScalarType::Bool,
            "u8" => ScalarType::Byte,
            "i8" => ScalarType::Char,
            "i16" => ScalarType::Short,
            "i32" => ScalarType::Int,
            "i64" => ScalarType::Long,
            "f16" => ScalarType::Half,
            "f32" => ScalarType::Float,
            "f64" => ScalarType::Double,
            _ => return None,
        };
        Some(scalar)
    }
}

/// Placement of a tensor. The host has no device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Cuda(u32),
}

impl Device {
    /// Accelerator ordinal, `None` for host tensors.
    pub fn device_id(self) -> Option<u32> {
        match self {
            Device::Cpu => None,
            Device::Cuda(ordinal) => Some(ordinal),
        }
    }

    pub fn is_accelerator(self) -> bool {
        self.device_id().is_some()
    }
}

/// Complete type descriptor of a tensor value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorType {
    pub scalar: ScalarType,
    pub device: Device,
    pub sizes: Vec<usize>,
    pub strides: Vec<usize>,
}

impl TensorType {
    /// Builds a type with row-major contiguous strides.
    pub fn new(scalar: ScalarType, device: Device, sizes: impl Into<Vec<usize>>) -> Self {
        let sizes = sizes.into();
        let strides = contiguous_strides(&sizes);
        Self {
            scalar,
            device,
            sizes,
            strides,
        }
    }

    pub fn with_strides(
        scalar: ScalarType,
        device: Device,
        sizes: impl Into<Vec<usize>>,
        strides: impl Into<Vec<usize>>,
    ) -> Self {
        Self {
            scalar,
            device,
            sizes: sizes.into(),
            strides: strides.into(),
        }
    }

    /// Same scalar kind and device, different geometry.
    pub fn with_sizes_strides(&self, sizes: &[usize], strides: &[usize]) -> Self {
        Self {
            scalar: self.scalar,
            device: self.device,
            sizes: sizes.to_vec(),
            strides: strides.to_vec(),
        }
    }

    /// Same sizes laid out row-major.
    pub fn contiguous(&self) -> Self {
        Self::new(self.scalar, self.device, self.sizes.clone())
    }

    pub fn is_contiguous(&self) -> bool {
        self.strides == contiguous_strides(&self.sizes)
    }

    pub fn rank(&self) -> usize {
        self.sizes.len()
    }

    pub fn numel(&self) -> usize {
        self.sizes.iter().product()
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.scalar.as_str(), join(&self.sizes))?;
        if !self.is_contiguous() {
            write!(f, "{{{}}}", join(&self.strides))?;
        }
        if let Device::Cuda(ordinal) = self.device {
            write!(f, "@cuda:{ordinal}")?;
        }
        Ok(())
    }
}

/// Row-major strides for `sizes`.
pub fn contiguous_strides(sizes: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; sizes.len()];
    let mut running = 1usize;
    for (idx, size) in sizes.iter().enumerate().rev() {
        strides[idx] = running;
        running = running.saturating_mul((*size).max(1));
    }
    strides
}

fn join(values: &[usize]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Float tensor on the first accelerator with contiguous layout.
pub fn cuda_f32(sizes: &[usize]) -> TensorType {
    TensorType::new(ScalarType::Float, Device::Cuda(0), sizes)
}

/// Float tensor on the host with contiguous layout.
pub fn cpu_f32(sizes: &[usize]) -> TensorType {
    TensorType::new(ScalarType::Float, Device::Cpu, sizes)
}
