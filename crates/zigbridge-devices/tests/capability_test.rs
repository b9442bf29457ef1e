use std::sync::Arc;

use zigbridge_core::config::{AdapterConfig, BridgeConfig};
use zigbridge_core::eventbus::EventBus;
use zigbridge_core::ids::Eui64;
use zigbridge_core::Error;
use zigbridge_devices::zcl::{self, data_type, ColorCommand};
use zigbridge_devices::{
    CapValue, CapabilityId, CapabilityLayer, DeviceModel, DeviceTarget, QuirksEngine,
    ReportingConfig, SentFrame, SimulatedStack, ZigbeeAdapter,
};

struct Setup {
    caps: CapabilityLayer,
    stack: Arc<SimulatedStack>,
}

fn setup_with(quirks: QuirksEngine) -> Setup {
    setup_config(
        AdapterConfig {
            default_transition_ds: 5,
            ..AdapterConfig::default()
        },
        quirks,
    )
}

fn setup_config(config: AdapterConfig, quirks: QuirksEngine) -> Setup {
    let stack = Arc::new(SimulatedStack::new());
    let adapter = Arc::new(ZigbeeAdapter::new(
        &config,
        Arc::new(EventBus::new()),
        DeviceModel::shared(),
        Arc::new(quirks),
        stack.clone(),
    ));
    adapter.init().unwrap();
    adapter.start_coordinator().unwrap();
    adapter.on_network_formed(0, 0x1A62, 15).unwrap();
    Setup {
        caps: CapabilityLayer::new(adapter),
        stack,
    }
}

fn setup() -> Setup {
    setup_with(QuirksEngine::with_builtin())
}

/// Announce a device and report its Basic cluster identity.
fn join(setup: &Setup, ieee: Eui64, nwk: u16, manufacturer: &str, model: &str) {
    let adapter = setup.caps.adapter();
    adapter.on_device_announce(ieee, nwk).unwrap();
    for (attr, s) in [
        (zcl::basic_attrs::MANUFACTURER_NAME, manufacturer),
        (zcl::basic_attrs::MODEL_IDENTIFIER, model),
    ] {
        let mut raw = vec![s.len() as u8];
        raw.extend_from_slice(s.as_bytes());
        adapter
            .on_attribute_report(nwk, 1, zcl::cluster::BASIC, attr, data_type::CHAR_STRING, &raw)
            .unwrap();
    }
}

#[test]
fn test_tradfri_brightness_never_zero() {
    let s = setup();
    let bulb = Eui64(0x000D6FFFFE000001);
    join(&s, bulb, 0x0101, "IKEA of Sweden", "TRADFRI bulb E27 WS");

    s.caps.light(DeviceTarget::new(bulb, 1)).set_brightness(0).unwrap();
    assert_eq!(
        s.stack.sent(),
        vec![SentFrame::Level {
            nwk: 0x0101,
            endpoint: 1,
            level: 1,
            transition_ds: 5
        }]
    );
}

#[test]
fn test_color_hsv_issues_two_commands() {
    let s = setup();
    let bulb = Eui64(0x0017880100000001);
    join(&s, bulb, 0x0202, "Signify", "LCT015");

    let [color, level] = s
        .caps
        .light(DeviceTarget::new(bulb, 11))
        .set_color_hsv(120, 200, 180)
        .unwrap();
    assert_ne!(color, level);
    assert_eq!(
        s.stack.sent(),
        vec![
            SentFrame::Color {
                nwk: 0x0202,
                endpoint: 11,
                command: ColorCommand::MoveToHueAndSaturation {
                    hue: 120,
                    saturation: 200,
                    transition_time: 5
                }
            },
            SentFrame::Level {
                nwk: 0x0202,
                endpoint: 11,
                level: 180,
                transition_ds: 5
            },
        ]
    );
    assert_eq!(s.caps.adapter().pending_commands(), 2);
}

#[test]
fn test_color_hsv_level_failure_keeps_color_id() {
    let s = setup_config(
        AdapterConfig {
            max_pending: 1,
            ..AdapterConfig::default()
        },
        QuirksEngine::new(),
    );
    let bulb = Eui64(0x0017880100000004);
    join(&s, bulb, 0x0205, "Signify", "LCT015");

    let err = s
        .caps
        .light(DeviceTarget::new(bulb, 11))
        .set_color_hsv(120, 200, 180)
        .unwrap_err();
    assert!(matches!(err.source, Error::ResourceExhausted(_)));
    assert_eq!(err.issued.len(), 1);
    assert!(matches!(s.stack.sent().as_slice(), [SentFrame::Color { .. }]));
    assert_eq!(s.caps.adapter().pending_commands(), 1);
}

#[test]
fn test_color_temperature_command() {
    let s = setup();
    let bulb = Eui64(0x0017880100000002);
    join(&s, bulb, 0x0203, "Signify", "LTW010");

    s.caps.light(DeviceTarget::new(bulb, 11)).set_color_temp(370).unwrap();
    assert_eq!(
        s.stack.sent(),
        vec![SentFrame::Color {
            nwk: 0x0203,
            endpoint: 11,
            command: ColorCommand::MoveToColorTemperature {
                color_temp_mireds: 370,
                transition_time: 5
            }
        }]
    );
}

#[test]
fn test_single_hue_write_keeps_saturation() {
    let s = setup();
    let bulb = Eui64(0x0017880100000003);
    join(&s, bulb, 0x0204, "Signify", "LCT015");
    s.caps
        .adapter()
        .on_attribute_report(0x0204, 11, zcl::cluster::COLOR_CONTROL, 0x0001, data_type::UINT8, &[77])
        .unwrap();

    s.caps
        .write(DeviceTarget::new(bulb, 11), CapabilityId::Hue, CapValue::Int(10))
        .unwrap();
    assert!(matches!(
        s.stack.sent().last(),
        Some(SentFrame::Color {
            command: ColorCommand::MoveToHueAndSaturation {
                hue: 10,
                saturation: 77,
                ..
            },
            ..
        })
    ));
}

#[test]
fn test_single_hue_write_corrects_stored_saturation() {
    let config = BridgeConfig::from_toml_str(
        r#"
        [[quirks]]
        manufacturer = "Acme"
        model = "RGB"
        actions = [{ kind = "clamp_range", target = "saturation", min = 0, max = 200 }]
        "#,
    )
    .unwrap();
    let mut quirks = QuirksEngine::new();
    quirks.register_from_config(&config.quirks).unwrap();

    let s = setup_with(quirks);
    let strip = Eui64(0x0000000000000045);
    join(&s, strip, 0x0045, "Acme", "RGB");
    s.caps
        .adapter()
        .on_attribute_report(0x0045, 1, zcl::cluster::COLOR_CONTROL, 0x0001, data_type::UINT8, &[250])
        .unwrap();

    s.caps
        .write(DeviceTarget::new(strip, 1), CapabilityId::Hue, CapValue::Int(30))
        .unwrap();
    assert!(matches!(
        s.stack.sent().last(),
        Some(SentFrame::Color {
            command: ColorCommand::MoveToHueAndSaturation {
                hue: 30,
                saturation: 200,
                ..
            },
            ..
        })
    ));
}

#[test]
fn test_sensor_unit_conversion() {
    let s = setup();
    let sensor = Eui64(0x00158D0000000001);
    join(&s, sensor, 0x0301, "Acme", "TH01");
    let adapter = s.caps.adapter();

    adapter
        .on_attribute_report(
            0x0301,
            1,
            zcl::cluster::TEMPERATURE_MEASUREMENT,
            0,
            data_type::INT16,
            &2150i16.to_le_bytes(),
        )
        .unwrap();
    adapter
        .on_attribute_report(
            0x0301,
            1,
            zcl::cluster::HUMIDITY_MEASUREMENT,
            0,
            data_type::UINT16,
            &4530u16.to_le_bytes(),
        )
        .unwrap();
    adapter
        .on_attribute_report(0x0301, 1, zcl::cluster::OCCUPANCY_SENSING, 0, data_type::BITMAP8, &[0x01])
        .unwrap();
    adapter
        .on_attribute_report(
            0x0301,
            1,
            zcl::cluster::POWER_CONFIG,
            zcl::attrs::BATTERY_PERCENTAGE_REMAINING,
            data_type::UINT8,
            &[150],
        )
        .unwrap();

    let reader = s.caps.sensor(DeviceTarget::new(sensor, 1));
    assert_eq!(reader.get_temperature().unwrap(), Some(21.5));
    assert_eq!(reader.get_humidity().unwrap(), Some(45.3));
    assert_eq!(reader.get_occupancy().unwrap(), Some(true));
    assert_eq!(reader.get_battery().unwrap(), Some(75));
}

#[test]
fn test_invalid_measurement_reads_as_unknown() {
    let s = setup();
    let sensor = Eui64(0x00158D0000000002);
    join(&s, sensor, 0x0302, "Acme", "TH01");
    s.caps
        .adapter()
        .on_attribute_report(
            0x0302,
            1,
            zcl::cluster::TEMPERATURE_MEASUREMENT,
            0,
            data_type::INT16,
            &i16::MIN.to_le_bytes(),
        )
        .unwrap();
    assert_eq!(
        s.caps
            .sensor(DeviceTarget::new(sensor, 1))
            .get_temperature()
            .unwrap(),
        None
    );
}

#[test]
fn test_spurious_battery_reports_dropped() {
    let s = setup();
    let motion = Eui64(0x00158D0000000003);
    join(&s, motion, 0x0303, "LUMI", "lumi.sensor_motion.aq2");
    s.caps
        .adapter()
        .on_attribute_report(
            0x0303,
            1,
            zcl::cluster::POWER_CONFIG,
            zcl::attrs::BATTERY_PERCENTAGE_REMAINING,
            data_type::UINT8,
            &[0],
        )
        .unwrap();

    let model = s.caps.adapter().model().read();
    let node = model.find_by_ieee(motion).unwrap();
    assert!(node
        .endpoint(1)
        .and_then(|ep| ep.cluster(zcl::cluster::POWER_CONFIG))
        .is_none());
}

#[test]
fn test_reporting_override_from_quirk() {
    let s = setup();
    let weather = Eui64(0x00158D0000000004);
    join(&s, weather, 0x0304, "LUMI", "lumi.weather");

    assert_eq!(
        s.caps
            .reporting_for(weather, CapabilityId::Temperature)
            .unwrap(),
        ReportingConfig::new(10, 3600, 50)
    );
    assert_eq!(
        s.caps.reporting_for(weather, CapabilityId::Humidity).unwrap(),
        CapabilityId::Humidity.default_reporting()
    );

    s.caps
        .configure_reporting(DeviceTarget::new(weather, 1), CapabilityId::Temperature)
        .unwrap();
    assert_eq!(
        s.stack.sent(),
        vec![SentFrame::ConfigureReporting {
            nwk: 0x0304,
            endpoint: 1,
            cluster: zcl::cluster::TEMPERATURE_MEASUREMENT,
            attribute: zcl::attrs::MEASURED_VALUE,
            config: ReportingConfig::new(10, 3600, 50)
        }]
    );
}

#[test]
fn test_refresh_reads_bound_attribute() {
    let s = setup();
    let plug = Eui64(0x0000000000000042);
    join(&s, plug, 0x0042, "Acme", "PLUG");
    s.caps
        .refresh(DeviceTarget::new(plug, 1), CapabilityId::OnOff)
        .unwrap();
    assert_eq!(
        s.stack.sent(),
        vec![SentFrame::ReadAttributes {
            nwk: 0x0042,
            endpoint: 1,
            cluster: zcl::cluster::ON_OFF,
            attributes: vec![zcl::attrs::ON_OFF]
        }]
    );
}

#[test]
fn test_config_quirk_remaps_write() {
    let config = BridgeConfig::from_toml_str(
        r#"
        [[quirks]]
        manufacturer = "Acme"
        model = "CT"
        match = "prefix"
        actions = [{ kind = "remap_attribute", target = "brightness", to = "color_temp" }]
        "#,
    )
    .unwrap();
    let mut quirks = QuirksEngine::new();
    assert_eq!(quirks.register_from_config(&config.quirks).unwrap(), 1);

    let s = setup_with(quirks);
    let lamp = Eui64(0x0000000000000043);
    join(&s, lamp, 0x0043, "Acme", "CT-200");
    s.caps
        .write(DeviceTarget::new(lamp, 1), CapabilityId::Brightness, CapValue::Int(300))
        .unwrap();
    assert!(matches!(
        s.stack.sent().last(),
        Some(SentFrame::Color {
            command: ColorCommand::MoveToColorTemperature {
                color_temp_mireds: 300,
                ..
            },
            ..
        })
    ));
}

#[test]
fn test_write_errors() {
    let s = setup();
    let dev = Eui64(0x0000000000000044);
    join(&s, dev, 0x0044, "Acme", "TH01");
    let target = DeviceTarget::new(dev, 1);

    assert!(matches!(
        s.caps
            .write(target, CapabilityId::Temperature, CapValue::Float(20.0)),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        s.caps.write(target, CapabilityId::OnOff, CapValue::Int(3)),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        s.caps
            .light(DeviceTarget::new(Eui64(0xDEAD), 1))
            .on(),
        Err(Error::NotFound(_))
    ));
    assert!(s.stack.sent().is_empty());
    assert_eq!(s.caps.adapter().pending_commands(), 0);
}
