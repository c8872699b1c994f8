//! wgpu accelerator: WGSL compute dispatch over column storage buffers
//!
//! Every binding of a device view becomes one storage buffer in bind group 0, in
//! declaration order. `read` columns are bound read-only; `write` and `read_write`
//! columns are bound `read_write` since WGSL has no write-only storage.

use crate::config::OffloadConfig;
use crate::error::{SoaError, SoaErrorContext, SoaResult};
use crate::offload::{
    AccessMode, Accelerator, DeviceElement, DeviceView, ErrorChannel, OffloadSession,
};
use crate::store::SoaStorage;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// A column uploaded as a storage buffer of lowered elements
#[derive(Debug)]
pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
    rows: usize,
    stride: u64,
}

impl WgpuBuffer {
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}

/// Workgroup layout of one dispatch.
///
/// Rows are laid out along x first; when a column needs more workgroups than one
/// dimension allows, the remainder wraps into y. Shaders recover the row with the
/// `row_index` helper the kernel prelude provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGrid {
    pub workgroup_size: u32,
    pub groups_x: u32,
    pub groups_y: u32,
}

impl DispatchGrid {
    /// Smallest grid covering `rows` invocations with at most `max_groups` workgroups
    /// per dimension
    pub fn plan(rows: usize, workgroup_size: u32, max_groups: u32) -> SoaResult<Self> {
        let workgroup_size = workgroup_size.max(1);
        let max_groups = u64::from(max_groups.max(1));
        let groups = (rows as u64).div_ceil(u64::from(workgroup_size));
        let groups_x = groups.clamp(1, max_groups);
        let groups_y = groups.div_ceil(groups_x).max(1);
        let pitch = groups_x * u64::from(workgroup_size);
        if groups_y > max_groups || pitch.saturating_mul(groups_y) > u64::from(u32::MAX) {
            return Err(SoaError::Device(format!(
                "{} rows exceed the dispatch limits ({} workgroups of {} per dimension)",
                rows, max_groups, workgroup_size
            )));
        }
        Ok(Self {
            workgroup_size,
            groups_x: groups_x as u32,
            groups_y: groups_y as u32,
        })
    }

    /// Invocations per grid row along y
    pub fn row_pitch(&self) -> u32 {
        self.groups_x * self.workgroup_size
    }
}

/// WGSL compute kernel with in-memory `#include` resolution.
///
/// `#include "name"` (or `<name>`) on its own line is replaced by the snippet registered
/// under `name`; each snippet is inserted once. A prelude is prepended with a
/// `WORKGROUP_SIZE` constant, so the entry point can be declared
/// `@workgroup_size(WORKGROUP_SIZE)`, and `fn row_index(id: vec3<u32>) -> u32`, which
/// maps the global invocation id to a row.
#[derive(Debug, Clone)]
pub struct WgslKernel {
    label: String,
    source: String,
    entry_point: String,
    workgroup_size: Option<u32>,
    includes: HashMap<String, String>,
}

impl WgslKernel {
    pub fn new(label: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            source: source.into(),
            entry_point: "main".to_string(),
            workgroup_size: None,
            includes: HashMap::new(),
        }
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    /// Override the accelerator's default workgroup size
    pub fn with_workgroup_size(mut self, size: u32) -> Self {
        self.workgroup_size = Some(size);
        self
    }

    pub fn with_include(mut self, name: impl Into<String>, snippet: impl Into<String>) -> Self {
        self.includes.insert(name.into(), snippet.into());
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Grid for `rows` rows, using this kernel's workgroup size or `default_workgroup_size`
    pub fn grid(
        &self,
        rows: usize,
        default_workgroup_size: u32,
        max_groups: u32,
    ) -> SoaResult<DispatchGrid> {
        DispatchGrid::plan(rows, self.workgroup_size_or(default_workgroup_size), max_groups)
    }

    /// Final shader source for one dispatch grid
    pub fn resolve(&self, grid: &DispatchGrid) -> SoaResult<String> {
        let mut output = format!(
            "const WORKGROUP_SIZE: u32 = {}u;\n\
             const ROW_PITCH: u32 = {}u;\n\
             fn row_index(id: vec3<u32>) -> u32 {{\n    return id.y * ROW_PITCH + id.x;\n}}\n",
            grid.workgroup_size,
            grid.row_pitch()
        );
        let mut seen = HashSet::new();
        self.expand(&self.source, &mut seen, &mut output)?;
        Ok(output)
    }

    fn expand<'k>(
        &'k self,
        content: &'k str,
        seen: &mut HashSet<&'k str>,
        output: &mut String,
    ) -> SoaResult<()> {
        for line in content.lines() {
            let Some(name) = parse_include(line) else {
                output.push_str(line);
                output.push('\n');
                continue;
            };
            let (name, snippet) = self.includes.get_key_value(name).ok_or_else(|| {
                SoaError::Device(format!(
                    "kernel '{}' includes unknown snippet '{}'",
                    self.label, name
                ))
            })?;
            if seen.insert(name.as_str()) {
                output.push_str("// Begin include: ");
                output.push_str(name);
                output.push('\n');
                self.expand(snippet, seen, output)?;
                output.push_str("// End include: ");
                output.push_str(name);
                output.push('\n');
            }
        }
        Ok(())
    }

    fn workgroup_size_or(&self, default: u32) -> u32 {
        self.workgroup_size.unwrap_or(default).max(1)
    }
}

fn parse_include(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("#include")?.trim();
    rest.strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .or_else(|| rest.strip_prefix('<').and_then(|r| r.strip_suffix('>')))
}

/// Accelerator backed by a caller-supplied wgpu device and queue.
///
/// Uncaptured device errors are routed into the accelerator's [`ErrorChannel`].
pub struct WgpuAccelerator {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    errors: ErrorChannel,
    label: String,
    workgroup_size: u32,
}

impl WgpuAccelerator {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, config: &OffloadConfig) -> Self {
        let label = format!("{}-wgpu", config.device_label);
        let errors = ErrorChannel::new(label.clone());
        let sink = errors.clone();
        device.on_uncaptured_error(Box::new(move |error| {
            sink.report(SoaError::Device(error.to_string()));
        }));
        log::debug!(
            "[WgpuAccelerator] Created {} (workgroup size {})",
            label,
            config.workgroup_size
        );
        Self {
            device,
            queue,
            errors,
            label,
            workgroup_size: config.workgroup_size.max(1),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn dispatch(
        &self,
        kernel: &WgslKernel,
        bindings: &[(AccessMode, &wgpu::Buffer)],
        rows: usize,
    ) -> SoaResult<()> {
        let max_groups = self.device.limits().max_compute_workgroups_per_dimension;
        let grid = kernel.grid(rows, self.workgroup_size, max_groups)?;
        let source = kernel.resolve(&grid)?;
        let label = Some(kernel.label());

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label,
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        let layout_entries = bindings
            .iter()
            .enumerate()
            .map(|(binding, (mode, _))| wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage {
                        read_only: *mode == AccessMode::Read,
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect::<Vec<_>>();
        let bind_group_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label,
                entries: &layout_entries,
            });

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label,
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label,
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: &kernel.entry_point,
            });

        let group_entries = bindings
            .iter()
            .enumerate()
            .map(|(binding, (_, buffer))| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect::<Vec<_>>();
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label,
            layout: &bind_group_layout,
            entries: &group_entries,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label,
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(grid.groups_x, grid.groups_y, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(SoaError::DispatchFailed {
                kernel: kernel.label().to_string(),
                reason: error.to_string(),
            });
        }
        log::trace!(
            "[WgpuAccelerator] Dispatched '{}' as {}x{} workgroup(s) of {}",
            kernel.label(),
            grid.groups_x,
            grid.groups_y,
            grid.workgroup_size
        );
        Ok(())
    }
}

impl Accelerator for WgpuAccelerator {
    type Buffer<T: DeviceElement> = WgpuBuffer;

    fn name(&self) -> &str {
        &self.label
    }

    fn errors(&self) -> &ErrorChannel {
        &self.errors
    }

    fn allocate<T: DeviceElement>(&self, column: &'static str, values: &[T]) -> SoaResult<WgpuBuffer> {
        let lowered = values.iter().map(T::lower).collect::<Vec<_>>();
        let stride = std::mem::size_of::<T::Repr>() as u64;
        if stride == 0 || stride % 4 != 0 {
            return Err(SoaError::Device(format!(
                "column '{}' element stride {} is not a multiple of 4 bytes",
                column, stride
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{} {}", self.label, column)),
                contents: bytemuck::cast_slice(&lowered),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(SoaError::Device(format!(
                "allocating '{}' ({} rows): {}",
                column,
                values.len(),
                error
            )));
        }

        Ok(WgpuBuffer {
            buffer,
            rows: values.len(),
            stride,
        })
    }

    fn buffer_len<T: DeviceElement>(&self, buffer: &WgpuBuffer) -> usize {
        buffer.rows
    }

    fn read_back<T: DeviceElement>(
        &self,
        column: &'static str,
        buffer: &WgpuBuffer,
        host: &mut [T],
    ) -> SoaResult<()> {
        if host.len() != buffer.rows {
            return Err(SoaError::DeviceSizeMismatch {
                column,
                device_len: buffer.rows,
                host_len: host.len(),
            });
        }
        let size = buffer.rows as u64 * buffer.stride;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} {} readback", self.label, column)),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("soa readback"),
            });
        encoder.copy_buffer_to_buffer(&buffer.buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            if tx.send(result).is_err() {
                log::error!("[WgpuAccelerator] Failed to send map_async result - receiver dropped");
            }
        });
        self.device.poll(wgpu::Maintain::Wait);
        pollster::block_on(rx)
            .device_context("readback channel closed")?
            .device_context(&format!("mapping '{}'", column))?;

        let data = slice.get_mapped_range();
        let stride = buffer.stride as usize;
        let raised = data
            .chunks_exact(stride)
            .zip(host.iter_mut())
            .try_for_each(|(chunk, slot)| -> SoaResult<()> {
                *slot = T::raise(bytemuck::pod_read_unaligned(chunk))?;
                Ok(())
            });
        drop(data);
        staging.unmap();
        raised
    }

    fn fence(&self) -> SoaResult<()> {
        self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }
}

impl<S: SoaStorage> OffloadSession<WgpuAccelerator, S> {
    /// Enqueue a WGSL compute dispatch over `V`'s loaded columns.
    ///
    /// At least one invocation is launched per row (rounded up to whole workgroups), so
    /// shaders should compute the row with `row_index` and guard it with `arrayLength`.
    /// Validation failures are returned here and reported through the accelerator's
    /// error channel; the affected columns are released without reconciling.
    pub fn submit_wgsl<V: DeviceView<Store = S>>(&mut self, kernel: &WgslKernel) -> SoaResult<()> {
        let access = self.begin_access::<V>(false)?;
        let accelerator = Arc::clone(self.accelerator());

        let result = V::BINDINGS
            .iter()
            .map(|binding| {
                self.device_buffer(binding.ordinal)
                    .and_then(|buffer| buffer.downcast_ref::<WgpuBuffer>())
                    .map(|buffer| (binding.mode, &buffer.buffer))
                    .ok_or(SoaError::ColumnNotLoaded {
                        column: binding.column,
                    })
            })
            .collect::<SoaResult<Vec<_>>>()
            .and_then(|bindings| accelerator.dispatch(kernel, &bindings, access.rows));

        if let Err(error) = result {
            accelerator.errors().report(error.clone());
            self.release(&access.ordinals);
            return Err(error);
        }

        log::debug!(
            "[WgpuAccelerator] Submitted '{}' over {} rows of view {}",
            kernel.label(),
            access.rows,
            V::NAME
        );
        self.register_dispatch(kernel.label().to_string(), access.ordinals, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_include() {
        assert_eq!(parse_include("#include \"shape\""), Some("shape"));
        assert_eq!(parse_include("  #include <shape>  "), Some("shape"));
        assert_eq!(parse_include("#include shape"), None);
        assert_eq!(parse_include("let x = 1;"), None);
    }

    #[test]
    fn test_resolve_expands_each_include_once() {
        let kernel = WgslKernel::new("k", "#include \"a\"\n#include \"a\"\nfn main() {}")
            .with_include("a", "#include \"b\"\nconst A: u32 = 1u;")
            .with_include("b", "const B: u32 = 2u;")
            .with_workgroup_size(32);
        let grid = kernel.grid(100, 64, 65535).unwrap();
        let source = kernel.resolve(&grid).unwrap();
        assert!(source.starts_with("const WORKGROUP_SIZE: u32 = 32u;\n"));
        assert!(source.contains("const ROW_PITCH: u32 = 128u;"));
        assert_eq!(source.matches("const A: u32").count(), 1);
        assert_eq!(source.matches("const B: u32").count(), 1);
        assert!(source.find("const B").unwrap() < source.find("const A").unwrap());
    }

    #[test]
    fn test_resolve_unknown_include() {
        let kernel = WgslKernel::new("k", "#include \"missing\"");
        let grid = DispatchGrid::plan(1, 64, 65535).unwrap();
        assert!(matches!(kernel.resolve(&grid), Err(SoaError::Device(_))));
    }

    #[test]
    fn test_default_workgroup_size() {
        let kernel = WgslKernel::new("k", "fn main() {}");
        let grid = kernel.grid(10, 64, 65535).unwrap();
        assert!(kernel
            .resolve(&grid)
            .unwrap()
            .starts_with("const WORKGROUP_SIZE: u32 = 64u;"));
        assert_eq!(kernel.workgroup_size_or(0), 1);
    }

    #[test]
    fn test_grid_fits_one_dimension() {
        let grid = DispatchGrid::plan(1024, 64, 65535).unwrap();
        assert_eq!((grid.groups_x, grid.groups_y), (16, 1));
        assert_eq!(grid.row_pitch(), 1024);

        let empty = DispatchGrid::plan(0, 64, 65535).unwrap();
        assert_eq!((empty.groups_x, empty.groups_y), (1, 1));
    }

    #[test]
    fn test_grid_wraps_into_y() {
        // 65535 * 64 + 1 rows need one workgroup more than x allows
        let rows = 65_535 * 64 + 1;
        let grid = DispatchGrid::plan(rows, 64, 65535).unwrap();
        assert_eq!((grid.groups_x, grid.groups_y), (65535, 2));
        let covered = u64::from(grid.row_pitch()) * u64::from(grid.groups_y);
        assert!(covered >= rows as u64);
    }

    #[test]
    fn test_grid_rejects_rows_beyond_limits() {
        let rows = 4 * 4 * 4 + 1;
        assert!(matches!(
            DispatchGrid::plan(rows, 4, 4),
            Err(SoaError::Device(_))
        ));
        assert!(DispatchGrid::plan(rows - 1, 4, 4).is_ok());
    }
}
