#![allow(dead_code)]

use ndrange_rs::dispatch::ScalarType;
use ndrange_rs::prelude::*;

pub const SOURCE: &str = r#"
__kernel void vecadd(__global const float* a, __global const float* b, __global float* c) {}
__kernel void reduce_scalar(__global float* data, __local float* scratch, __global float* partials) {}
__kernel void reduce_vector4(__global float4* data, __local float4* scratch, __global float4* partials) {}
__kernel void offset2d(__global float* out) {}
__kernel void scale(__global float* data, float factor) {}
__kernel void fill(__global float* data, float value) {}
__kernel void serial_reduce(__global float* data, __local float* scratch, __global float* partials) {}
"#;

pub const ATOMIC_SOURCE: &str = r#"
#pragma OPENCL EXTENSION cl_khr_local_int32_base_atomics : enable
__kernel void atomic(__global int* x) {}
"#;

pub const SEARCH_SOURCE: &str = r#"
__kernel void string_search(char16 pattern, __global char* text, int chars_per_item,
                            __local int* local_result, __global int* global_result) {}
"#;

fn vecadd() -> KernelDef {
    KernelDef::new(
        "vecadd",
        vec![ParamKind::Global, ParamKind::Global, ParamKind::Global],
        |wg| {
            let a = wg.global::<f32>(0)?;
            let b = wg.global::<f32>(1)?;
            let c = wg.global_mut::<f32>(2)?;
            wg.for_each_item(|item| {
                let i = item.global_id(0);
                c.set(i, a.get(i) + b.get(i));
            });
            Ok(())
        },
    )
}

fn reduce_scalar(name: &str) -> KernelDef {
    KernelDef::new(
        name,
        vec![ParamKind::Global, ParamKind::Local, ParamKind::Global],
        |wg| {
            let data = wg.global::<f32>(0)?;
            let scratch = wg.local::<f32>(1)?;
            let partials = wg.global_mut::<f32>(2)?;

            wg.for_each_item(|item| scratch.set(item.local_id(0), data.get(item.global_id(0))));
            let mut stride = wg.local_size(0) / 2;
            while stride > 0 {
                wg.for_each_item(|item| {
                    let l = item.local_id(0);
                    if l < stride {
                        scratch.set(l, scratch.get(l) + scratch.get(l + stride));
                    }
                });
                stride /= 2;
            }
            partials.set(wg.group_id(0), scratch.get(0));
            Ok(())
        },
    )
}

fn reduce_vector4() -> KernelDef {
    KernelDef::new(
        "reduce_vector4",
        vec![ParamKind::Global, ParamKind::Local, ParamKind::Global],
        |wg| {
            let data = wg.global::<[f32; 4]>(0)?;
            let scratch = wg.local::<[f32; 4]>(1)?;
            let partials = wg.global_mut::<[f32; 4]>(2)?;

            wg.for_each_item(|item| scratch.set(item.local_id(0), data.get(item.global_id(0))));
            let mut stride = wg.local_size(0) / 2;
            while stride > 0 {
                wg.for_each_item(|item| {
                    let l = item.local_id(0);
                    if l < stride {
                        let (x, y) = (scratch.get(l), scratch.get(l + stride));
                        scratch.set(l, [x[0] + y[0], x[1] + y[1], x[2] + y[2], x[3] + y[3]]);
                    }
                });
                stride /= 2;
            }
            partials.set(wg.group_id(0), scratch.get(0));
            Ok(())
        },
    )
}

fn offset2d() -> KernelDef {
    KernelDef::new("offset2d", vec![ParamKind::Global], |wg| {
        let out = wg.global_mut::<f32>(0)?;
        wg.for_each_item(|item| {
            let value = (item.global_id(0) * 10 + item.global_id(1)) as f32;
            out.set(item.global_linear_id(), value);
        });
        Ok(())
    })
}

fn scalar_op(name: &str, op: fn(f32, f32) -> f32) -> KernelDef {
    KernelDef::new(
        name,
        vec![ParamKind::Global, ParamKind::Scalar(ScalarType::F32)],
        move |wg| {
            let data = wg.global_mut::<f32>(0)?;
            let operand: f32 = wg.scalar(1)?;
            wg.for_each_item(|item| {
                let i = item.global_id(0);
                data.set(i, op(data.get(i), operand));
            });
            Ok(())
        },
    )
}

fn atomic() -> KernelDef {
    KernelDef::new("atomic", vec![ParamKind::Global], |wg| {
        let x = wg.global_mut::<i32>(0)?;
        let counters = wg.shared::<i32>()?;
        wg.for_each_item(|_| {
            counters.atomic_inc(1);
        });
        wg.for_each_item(|item| {
            if item.local_id(0) == 0 {
                x.set(0, 1);
                x.set(1, counters.get(1));
            }
        });
        Ok(())
    })
    .static_local(8)
    .requires("cl_khr_local_int32_base_atomics")
}

fn string_search() -> KernelDef {
    KernelDef::new(
        "string_search",
        vec![
            ParamKind::Scalar(ScalarType::Bytes(16)),
            ParamKind::Global,
            ParamKind::Scalar(ScalarType::I32),
            ParamKind::Local,
            ParamKind::Global,
        ],
        |wg| {
            let pattern = wg.bytes(0)?;
            let text = wg.global::<u8>(1)?;
            let per_item = wg.scalar::<i32>(2)? as usize;
            let local = wg.local::<i32>(3)?;
            let global = wg.global_mut::<i32>(4)?;

            wg.for_each_item(|item| {
                let start = item.global_id(0) * per_item;
                for i in start..start + per_item {
                    if i + 16 > text.len() {
                        break;
                    }
                    for word in 0..4 {
                        let at = i + word * 4;
                        if (0..4).all(|k| text.get(at + k) == pattern[word * 4 + k]) {
                            local.atomic_inc(word);
                        }
                    }
                }
            });
            wg.for_each_item(|item| {
                if item.local_id(0) == 0 {
                    for word in 0..4 {
                        global.atomic_add(word, local.get(word));
                    }
                }
            });
            Ok(())
        },
    )
}

pub fn registry() -> KernelRegistry {
    KernelRegistry::new()
        .with(vecadd())
        .with(reduce_scalar("reduce_scalar"))
        .with(reduce_vector4())
        .with(reduce_scalar("serial_reduce").work_group_limit(1))
        .with(offset2d())
        .with(scalar_op("scale", |x, f| x * f))
        .with(scalar_op("fill", |_, v| v))
        .with(atomic())
        .with(string_search())
}

/// Host platform only, two worker threads.
pub fn host_runtime() -> Runtime {
    let config = Config::builder().num_threads(2).build().unwrap();
    Runtime::new(config, registry()).unwrap()
}

pub fn runtime_with(config: Config) -> Runtime {
    Runtime::new(config, registry()).unwrap()
}

pub fn host_session() -> Session {
    host_runtime().default_session().unwrap()
}

pub fn build(session: &Session, source: &str) -> Program {
    session
        .build(&KernelSource::new("test.cl", source), "")
        .unwrap()
}
