mod common;

use ndrange_rs::prelude::*;

const N: usize = 131_072;

fn input() -> Vec<f32> {
    (0..N).map(|i| (i % 8) as f32).collect()
}

fn expected() -> f64 {
    (N / 8 * 28) as f64
}

fn ramp() -> Vec<f32> {
    (0..N).map(|i| i as f32).collect()
}

fn assert_close(total: f64, expected: f64) {
    assert!(
        (total - expected).abs() <= 0.01 * expected.abs(),
        "got {}, expected {}",
        total,
        expected
    );
}

fn reduce(session: &Session, kernel_name: &str, variant: ReductionVariant) -> (WorkPartitionPlan, f64) {
    reduce_values(session, kernel_name, variant, &input())
}

fn reduce_values(
    session: &Session,
    kernel_name: &str,
    variant: ReductionVariant,
    values: &[f32],
) -> (WorkPartitionPlan, f64) {
    let program = common::build(session, common::SOURCE);
    let mut kernel = program.kernel(kernel_name).unwrap();
    let plan = WorkPartitionPlanner::for_type::<f32>(variant)
        .plan_for(N, &kernel, session.device())
        .unwrap();

    let ctx = session.context();
    let data = Buffer::from_slice(ctx, MemAccess::ReadOnly, values).unwrap();
    let partials = Buffer::device_only::<f32>(ctx, MemAccess::WriteOnly, plan.partial_count()).unwrap();
    kernel
        .bind_arguments([
            KernelArg::buffer(&data),
            plan.local_arg(),
            KernelArg::buffer(&partials),
        ])
        .unwrap();

    let queue = session.queue();
    let done = queue.enqueue_range(&kernel, &plan.range(), &[]).unwrap();
    let sums: Vec<f32> = queue.read_buffer(&partials, &[done]).unwrap();
    assert_eq!(sums.len(), plan.partial_count());

    let total = match variant {
        ReductionVariant::Scalar => finalize_scalar(&sums),
        ReductionVariant::Vector { width } => finalize_vector(&sums, width).unwrap(),
    };
    (plan, total)
}

#[test]
fn test_scalar_reduction_round_trip() {
    let session = common::host_session();
    let (plan, total) = reduce(&session, "reduce_scalar", ReductionVariant::Scalar);

    assert_eq!(plan.work_group_size, 1024);
    assert_eq!(plan.num_groups, N / 1024);
    assert!(plan.local_buffer_bytes <= session.device().info().local_memory_bytes);
    assert_eq!(total, expected());
}

#[test]
fn test_vector_reduction_round_trip() {
    let session = common::host_session();
    let (plan, total) = reduce(&session, "reduce_vector4", ReductionVariant::VECTOR4);

    assert_eq!(plan.total_elements, N / 4);
    assert_eq!(plan.num_groups, N / 4 / plan.work_group_size);
    assert_eq!(total, expected());
}

#[test]
fn test_ramp_sum_within_tolerance() {
    let session = common::host_session();
    let expected = (N as f64) * (N as f64 - 1.0) / 2.0;

    let (_, scalar) = reduce_values(&session, "reduce_scalar", ReductionVariant::Scalar, &ramp());
    assert_close(scalar, expected);

    let (_, vector) = reduce_values(&session, "reduce_vector4", ReductionVariant::VECTOR4, &ramp());
    assert_close(vector, expected);
}

#[test]
fn test_small_local_memory_shrinks_groups() {
    let config = Config::builder()
        .host_platform(false)
        .num_threads(2)
        .platform(
            PlatformSpec::new("Lab", "Acme")
                .device(DeviceSpec::gpu("Tiny").max_work_group_size(1024).local_memory(4096)),
        )
        .build()
        .unwrap();
    let session = common::runtime_with(config).default_session().unwrap();
    let (plan, total) = reduce(&session, "reduce_vector4", ReductionVariant::VECTOR4);

    // 1024 * 16 bytes does not fit in 4 KiB; one step of /4 gives 256
    assert_eq!(plan.work_group_size, 256);
    assert_eq!(plan.local_buffer_bytes, 4096);
    assert_eq!(total, expected());
}

#[test]
fn test_kernel_limited_to_one_item_is_fatal() {
    let session = common::host_session();
    let program = common::build(&session, common::SOURCE);
    let kernel = program.kernel("serial_reduce").unwrap();
    assert_eq!(kernel.work_group_size(session.device()).unwrap(), 1);

    let err = WorkPartitionPlanner::for_type::<f32>(ReductionVariant::Scalar)
        .plan_for(N, &kernel, session.device())
        .unwrap_err();
    match err {
        Error::NoParallelismAvailable { kernel, .. } => assert_eq!(kernel, "serial_reduce"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_plan_launch_rejects_group_over_kernel_limit() {
    let session = common::host_session();
    let program = common::build(&session, common::SOURCE);
    let mut kernel = program.kernel("serial_reduce").unwrap();

    let ctx = session.context();
    let data = Buffer::from_slice(ctx, MemAccess::ReadOnly, &input()).unwrap();
    let partials = Buffer::device_only::<f32>(ctx, MemAccess::WriteOnly, 128).unwrap();
    kernel.set_arg(0, &data).unwrap();
    kernel.set_arg(1, KernelArg::local_array::<f32>(1024)).unwrap();
    kernel.set_arg(2, &partials).unwrap();

    let range = NdRange::d1(N).with_local(&[1024]);
    assert!(matches!(
        session.queue().enqueue_range(&kernel, &range, &[]),
        Err(Error::RuntimeDispatch(_))
    ));
}
