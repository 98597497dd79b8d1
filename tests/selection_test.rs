mod common;

use ndrange_rs::platform::{present_options, resolve_selection};
use ndrange_rs::prelude::*;
use proptest::prelude::*;

fn lab_runtime() -> Runtime {
    let config = Config::builder()
        .num_threads(2)
        .platform(
            PlatformSpec::new("Lab", "Acme")
                .device(DeviceSpec::gpu("Acme R9"))
                .device(DeviceSpec::cpu("Acme Xeon")),
        )
        .platform(PlatformSpec::new("Accel", "Widget").device(DeviceSpec::gpu("W1")))
        .build()
        .unwrap();
    common::runtime_with(config)
}

#[test]
fn test_options_are_flattened_in_enumeration_order() {
    let rt = lab_runtime();
    let options = present_options(rt.platforms());
    let lines: Vec<String> = options.iter().map(|o| o.to_string()).collect();

    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("Option 0: Platform - ndrange, Device - "));
    assert_eq!(lines[1], "Option 1: Platform - Acme, Device - Acme R9");
    assert_eq!(lines[2], "Option 2: Platform - Acme, Device - Acme Xeon");
    assert_eq!(lines[3], "Option 3: Platform - Widget, Device - W1");
}

#[test]
fn test_resolution_rejects_malformed_input() {
    let rt = lab_runtime();
    for raw in ["", "   ", "-1", "+1", "1.0", "1a", "one", "4", "1 2", "99999999999999999999999"] {
        let err = resolve_selection(rt.platforms(), raw).unwrap_err();
        assert!(
            matches!(err, Error::InvalidOption { .. }),
            "{:?} gave {:?}",
            raw,
            err
        );
        assert!(err.is_recoverable());
    }
}

#[test]
fn test_selected_session_binds_device() {
    let rt = lab_runtime();
    let session = rt.select("\t3 \n").unwrap();
    assert_eq!(session.platform().vendor(), "Widget");
    assert_eq!(session.device().name(), "W1");
    assert_eq!(session.device().kind(), DeviceType::Gpu);
    assert_eq!(session.context().devices().len(), 1);
}

#[test]
fn test_empty_option_list() {
    let config = Config::builder().host_platform(false).build().unwrap();
    let rt = common::runtime_with(config);
    assert!(rt.options().is_empty());
    assert!(matches!(
        resolve_selection(rt.platforms(), "0"),
        Err(Error::NoDeviceSelected)
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_every_ordinal_round_trips(index in 0usize..4, lead in "[ \t]{0,3}", trail in "[ \t\n]{0,3}") {
        let rt = lab_runtime();
        let options = present_options(rt.platforms());
        let raw = format!("{}{}{}", lead, index, trail);
        let (platform, device) = resolve_selection(rt.platforms(), &raw).unwrap();

        prop_assert_eq!(platform.index(), options[index].platform_index);
        prop_assert_eq!(device.id().device, options[index].device_index);
        prop_assert_eq!(platform.vendor(), options[index].platform_vendor.as_str());
        prop_assert_eq!(device.name(), options[index].device_name.clone());
    }

    #[test]
    fn prop_non_numeric_input_is_invalid(raw in "[a-zA-Z+.,#-]{1,8}[0-9]{0,2}") {
        let rt = lab_runtime();
        let is_invalid = matches!(
            resolve_selection(rt.platforms(), &raw),
            Err(Error::InvalidOption { .. })
        );
        prop_assert!(is_invalid);
    }
}
