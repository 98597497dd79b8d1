mod common;

use ndrange_rs::prelude::*;
use ndrange_rs::program::BuildStatus;
use std::fs;

const FP64_SOURCE: &str = r#"
#pragma OPENCL EXTENSION cl_khr_fp64 : enable
__kernel void scale(__global float* data, float factor) {}
"#;

/// One platform, two devices; only the first supports doubles.
fn mixed_platform() -> (Runtime, Context) {
    let config = Config::builder()
        .host_platform(false)
        .num_threads(2)
        .platform(
            PlatformSpec::new("Lab", "Acme")
                .device(DeviceSpec::gpu("Acme R9").extension("cl_khr_fp64"))
                .device(DeviceSpec::cpu("Acme Atom")),
        )
        .build()
        .unwrap();
    let rt = common::runtime_with(config);
    let ctx = Context::from_platform(&rt.platforms()[0]).unwrap();
    (rt, ctx)
}

#[test]
fn test_build_failure_lists_only_failing_devices() {
    let (_rt, ctx) = mixed_platform();
    let devices = ctx.devices().to_vec();
    let source = KernelSource::new("fp64.cl", FP64_SOURCE);

    let err = Program::build(&ctx, &devices, &source, "").unwrap_err();
    let logs = err.build_logs().expect("build failure");
    assert_eq!(logs.len(), 1);
    assert!(logs.contains_key(&devices[1].id()));
    assert!(!logs.contains_key(&devices[0].id()));

    let entry = &logs[&devices[1].id()];
    assert_eq!(entry.device_name, "Acme Atom");
    assert!(entry.log.contains("fp64.cl:2: error: extension 'cl_khr_fp64'"));

    let rendered = err.to_string();
    assert!(rendered.contains("Device - Acme Atom, build log:"));
    assert!(!rendered.contains("Device - Acme R9"));
}

#[test]
fn test_build_for_capable_device_only_succeeds() {
    let (_rt, ctx) = mixed_platform();
    let capable = ctx.devices()[0].clone();
    let other = ctx.devices()[1].clone();
    let source = KernelSource::new("fp64.cl", FP64_SOURCE);

    let program = Program::build(&ctx, std::slice::from_ref(&capable), &source, "-D N=4").unwrap();
    assert_eq!(program.build_status(&capable), BuildStatus::Success);
    assert_eq!(program.build_status(&other), BuildStatus::None);
    assert_eq!(program.build_log(&capable), Some(""));
    assert_eq!(program.build_log(&other), None);
    assert_eq!(program.options(), "-D N=4");
    assert_eq!(program.kernel_names().collect::<Vec<_>>(), vec!["scale"]);
}

#[test]
fn test_error_directive_fails_every_device() {
    let (_rt, ctx) = mixed_platform();
    let devices = ctx.devices().to_vec();
    let source = KernelSource::new(
        "broken.cl",
        "__kernel void fill(__global float* d, float v) {}\n#error unfinished\n",
    );

    let err = Program::build(&ctx, &devices, &source, "").unwrap_err();
    let logs = err.build_logs().unwrap();
    assert_eq!(logs.len(), 2);
    for log in logs.values() {
        assert!(log.log.contains("broken.cl:2: error: unfinished"));
    }
}

#[test]
fn test_defines_select_guarded_pragmas() {
    let (_rt, ctx) = mixed_platform();
    let devices = ctx.devices().to_vec();
    let source = KernelSource::new(
        "maybe_fp64.cl",
        "#ifdef USE_DOUBLE\n\
         #pragma OPENCL EXTENSION cl_khr_fp64 : enable\n\
         #endif\n\
         __kernel void scale(__global float* data, float factor) {}\n",
    );

    let program = Program::build(&ctx, &devices, &source, "").unwrap();
    assert!(devices
        .iter()
        .all(|d| program.build_status(d) == BuildStatus::Success));

    let err = Program::build(&ctx, &devices, &source, "-DUSE_DOUBLE").unwrap_err();
    let logs = err.build_logs().unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[&devices[1].id()]
        .log
        .contains("maybe_fp64.cl:2: error: extension 'cl_khr_fp64'"));
}

#[test]
fn test_invalid_options_are_runtime_build_errors() {
    let session = common::host_session();
    let source = KernelSource::new("k.cl", common::SOURCE);
    let err = session.build(&source, "-O9 --turbo").unwrap_err();
    assert!(matches!(err, Error::RuntimeBuild(_)), "{:?}", err);
    assert!(err.build_logs().is_none());
}

#[test]
fn test_device_outside_context_is_rejected() {
    let (rt, ctx) = mixed_platform();
    let host_session = common::host_session();
    let source = KernelSource::new("k.cl", common::SOURCE);

    let err = Program::build(&ctx, std::slice::from_ref(host_session.device()), &source, "")
        .unwrap_err();
    assert!(matches!(err, Error::RuntimeBuild(_)));
    assert!(matches!(
        Program::build(&ctx, &[], &source, ""),
        Err(Error::RuntimeBuild(_))
    ));
    drop(rt);
}

#[test]
fn test_unknown_kernel_name() {
    let session = common::host_session();
    let program = common::build(&session, common::SOURCE);

    assert!(program.kernel("vecadd").is_ok());
    match program.kernel("vec_add") {
        Err(Error::KernelNotFound { name }) => assert_eq!(name, "vec_add"),
        other => panic!("unexpected: {:?}", other.map(|k| k.name().to_string())),
    }
    assert_eq!(program.create_kernels().len(), 7);
}

#[test]
fn test_extension_gated_kernel_builds_on_host() {
    let session = common::host_session();
    let program = common::build(&session, common::ATOMIC_SOURCE);
    assert_eq!(program.build_status(session.device()), BuildStatus::Success);
    assert!(program.kernel("atomic").is_ok());
}

#[test]
fn test_extension_gated_kernel_fails_without_support() {
    let config = Config::builder()
        .host_platform(false)
        .num_threads(2)
        .platform(PlatformSpec::new("Lab", "Acme").device(DeviceSpec::gpu("Plain")))
        .build()
        .unwrap();
    let session = common::runtime_with(config).default_session().unwrap();
    let err = session
        .build(&KernelSource::new("atomic.cl", common::ATOMIC_SOURCE), "")
        .unwrap_err();

    let failure = match &err {
        Error::BuildFailure(failure) => failure,
        other => panic!("unexpected: {:?}", other),
    };
    let log = failure.log_for(session.device().id()).unwrap();
    assert!(log.log.contains("cl_khr_local_int32_base_atomics"));
}

#[test]
fn test_load_source_from_kernel_dir() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("vecadd.cl"), common::SOURCE).unwrap();

    let config = Config::builder()
        .num_threads(2)
        .kernel_dir(dir.path())
        .build()
        .unwrap();
    let rt = common::runtime_with(config);

    let source = rt.load_source("vecadd.cl").unwrap();
    assert_eq!(source.label(), "vecadd.cl");
    assert!(source.kernel_names().any(|k| k == "reduce_scalar"));

    match rt.load_source("missing.cl") {
        Err(Error::SourceNotFound { path }) => assert_eq!(path, dir.path().join("missing.cl")),
        other => panic!("unexpected: {:?}", other.map(|s| s.label().to_string())),
    }
}
