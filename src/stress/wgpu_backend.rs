use log::debug;
use std::borrow::Cow;
use wgpu::util::DeviceExt;

use crate::error::GpuError;
use crate::stress::gpu::{ComputeBackend, ComputeSession};

const WORKGROUP: u32 = 8;

const SHADER: &str = r#"
struct Params {
    n: u32,
    pad0: u32,
    pad1: u32,
    pad2: u32,
};

@group(0) @binding(0) var<storage, read> a: array<f32>;
@group(0) @binding(1) var<storage, read> b: array<f32>;
@group(0) @binding(2) var<storage, read_write> c: array<f32>;
@group(0) @binding(3) var<uniform> params: Params;

@compute @workgroup_size(8, 8)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let n = params.n;
    if (id.x >= n || id.y >= n) {
        return;
    }
    var sum = 0.0;
    for (var k = 0u; k < n; k = k + 1u) {
        sum = sum + a[id.y * n + k] * b[k * n + id.x];
    }
    c[id.y * n + id.x] = sum;
}
"#;

/// Hardware adapters reachable through wgpu. Software rasterisers are ignored.
pub struct WgpuBackend;

fn hardware_adapter(instance: &wgpu::Instance) -> Option<wgpu::Adapter> {
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        force_fallback_adapter: false,
        compatible_surface: None,
    }))?;
    if adapter.get_info().device_type == wgpu::DeviceType::Cpu {
        debug!("Ignoring software adapter {}", adapter.get_info().name);
        return None;
    }
    Some(adapter)
}

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

impl ComputeBackend for WgpuBackend {
    fn discover(&self) -> Option<String> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        hardware_adapter(&instance).map(|adapter| adapter.get_info().name)
    }

    fn open(&self, matrix_size: u32) -> Result<Box<dyn ComputeSession>, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = hardware_adapter(&instance).ok_or(GpuError::NoDevice)?;
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("stressmon"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))
        .map_err(|e| GpuError::Open(e.to_string()))?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let n = matrix_size as usize;
        let a: Vec<f32> = (0..n * n).map(|i| (i % 7) as f32 * 0.5).collect();
        let b: Vec<f32> = (0..n * n).map(|i| (i % 5) as f32 - 1.5).collect();

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("matmul"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(SHADER)),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("matmul"),
            layout: None,
            module: &module,
            entry_point: "main",
        });

        let a_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("a"),
            contents: &f32_bytes(&a),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let b_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("b"),
            contents: &f32_bytes(&b),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let c_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("c"),
            size: (n * n * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let params: Vec<u8> = [matrix_size, 0, 0, 0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("params"),
            contents: &params,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let layout = pipeline.get_bind_group_layout(0);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("matmul"),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: a_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: b_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: c_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params_buf.as_entire_binding(),
                },
            ],
        });

        if let Some(e) = pollster::block_on(device.pop_error_scope()) {
            return Err(GpuError::Open(e.to_string()));
        }

        Ok(Box::new(WgpuSession {
            device,
            queue,
            pipeline,
            bind_group,
            groups: matrix_size.div_ceil(WORKGROUP),
            _buffers: [a_buf, b_buf, c_buf, params_buf],
        }))
    }
}

struct WgpuSession {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    groups: u32,
    _buffers: [wgpu::Buffer; 4],
}

impl ComputeSession for WgpuSession {
    fn dispatch_and_wait(&mut self) -> Result<(), GpuError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("matmul"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("matmul"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(self.groups, self.groups, 1);
        }
        let index = self.queue.submit(Some(encoder.finish()));
        self.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));

        match pollster::block_on(self.device.pop_error_scope()) {
            Some(e) => Err(GpuError::Dispatch(e.to_string())),
            None => Ok(()),
        }
    }
}
