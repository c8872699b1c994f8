//! Tagged-union columns visited on the host pool and on the GPU

use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use soa_cache::config::OffloadConfig;
use soa_cache::offload::{
    Accelerator, HostAccelerator, HostKernel, OffloadSession, WgpuAccelerator, WgslKernel,
};
use soa_cache::store::SoaStorage;
use std::f32::consts::PI;
use std::sync::Arc;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Rectangle {
    pub width: f32,
    pub height: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Circle {
    pub radius: f32,
}

soa_cache::tagged_union! {
    pub enum Shape visit ShapeVisitor {
        Rectangle(Rectangle) = 0 => rectangle,
        Circle(Circle) = 1 => circle,
    }
}

soa_cache::soa_store! {
    pub struct ShapeTable {
        shape: Outline => Shape,
        area: Area => f32,
    }
}

soa_cache::soa_view! {
    pub device struct ComputeArea<'s> for ShapeTable {
        shape: read Outline,
        area: write Area,
    }
}

struct AreaOf;

impl ShapeVisitor for AreaOf {
    type Output = f32;

    fn rectangle(&self, value: &Rectangle) -> f32 {
        value.width * value.height
    }

    fn circle(&self, value: &Circle) -> f32 {
        PI * value.radius * value.radius
    }
}

struct AreaKernel;

impl HostKernel<ComputeArea<'static>> for AreaKernel {
    fn run(&self, _row: usize, lane: ComputeArea<'_>) {
        lane.area.set(lane.shape.visit(&AreaOf));
    }
}

const AREA_SHADER: &str = r#"
#include "shape"

@group(0) @binding(0) var<storage, read> shapes: array<Shape>;
@group(0) @binding(1) var<storage, read_write> areas: array<f32>;

fn shape_rectangle(payload: array<u32, 7>) -> f32 {
    return bitcast<f32>(payload[0]) * bitcast<f32>(payload[1]);
}

fn shape_circle(payload: array<u32, 7>) -> f32 {
    let radius = bitcast<f32>(payload[0]);
    return 3.14159265358979 * radius * radius;
}

@compute @workgroup_size(WORKGROUP_SIZE)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let row = row_index(id);
    if (row >= arrayLength(&areas)) {
        return;
    }
    areas[row] = visit_shape(shapes[row]);
}
"#;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn init_gpu() -> Option<(Arc<wgpu::Device>, Arc<wgpu::Queue>)> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;

    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("soa-cache test device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
        },
        None,
    ))
    .ok()?;

    Some((Arc::new(device), Arc::new(queue)))
}

fn shape_table() -> ShapeTable {
    ShapeTable::from_columns(
        vec![
            Shape::Rectangle(Rectangle {
                width: 1.0,
                height: 1.0,
            }),
            Shape::Rectangle(Rectangle {
                width: 2.0,
                height: 1.0,
            }),
            Shape::Rectangle(Rectangle {
                width: 1.0,
                height: 2.0,
            }),
            Shape::Circle(Circle { radius: 1.0 }),
        ],
        vec![0.0; 4],
    )
}

fn assert_areas(table: &ShapeTable) {
    let areas = table.column::<Area>().as_slice();
    let expected = [1.0, 2.0, 2.0, PI];
    for (row, (&got, &want)) in areas.iter().zip(expected.iter()).enumerate() {
        assert!((got - want).abs() < 1e-5, "row {}: {} != {}", row, got, want);
    }
}

#[test]
fn test_area_on_host() -> Result<()> {
    init_logging();
    let mut table = shape_table();
    let accelerator = Arc::new(HostAccelerator::new(&OffloadConfig::default())?);
    let mut session = OffloadSession::new(accelerator);

    session.load::<ComputeArea>(&table)?;
    session.submit::<ComputeArea, _>(AreaKernel)?;
    session.sync::<ComputeArea>(&mut table)?;

    assert_areas(&table);
    assert_eq!(table.column::<Outline>().as_slice(), shape_table().column::<Outline>().as_slice());
    Ok(())
}

#[test]
fn test_area_on_gpu() -> Result<()> {
    init_logging();
    let Some((device, queue)) = init_gpu() else {
        println!("Skipping GPU test - no GPU available");
        return Ok(());
    };

    let mut table = shape_table();
    let accelerator = Arc::new(WgpuAccelerator::new(device, queue, &OffloadConfig::default()));
    let mut session = OffloadSession::new(Arc::clone(&accelerator));

    let snippet = format!("{}\n{}", Shape::wgsl_prelude(), Shape::wgsl_visitor("f32"));
    let kernel = WgslKernel::new("shape area", AREA_SHADER).with_include("shape", snippet);

    session.load::<ComputeArea>(&table)?;
    session.submit_wgsl::<ComputeArea>(&kernel)?;
    session.sync::<ComputeArea>(&mut table)?;

    assert_areas(&table);
    assert!(accelerator.errors().is_empty());
    Ok(())
}
