//! Loading pipeline configuration from JSON documents

use std::sync::Arc;

use neuroloop_core::time_sync::{ManualCounter, TimeSync};
use neuroloop_core::types::ChannelMask;
use neuroloop_native::config::PipelineConfig;
use neuroloop_native::error::{ConfigError, ProcessingError};
use neuroloop_native::pipeline::EegPipeline;
use serde_json::{json, Value};

fn default_document() -> Value {
    serde_json::to_value(PipelineConfig::default()).unwrap()
}

#[test]
fn test_missing_deadline_uses_default() {
    let mut doc = default_document();
    doc.as_object_mut().unwrap().remove("deadline_us");

    let config: PipelineConfig = serde_json::from_value(doc).unwrap();
    assert_eq!(config.deadline_us, 20_000);
    assert!(config.validate().is_ok());
}

#[test]
fn test_edited_document() {
    let mut doc = default_document();
    doc["eeg"]["sample_rate_hz"] = json!(500.0);
    doc["eeg"]["window_size"] = json!(512);
    doc["eeg"]["window"] = json!("Blackman");
    doc["eeg"]["artifact"]["amplitude_uv"] = json!(150.0);
    doc["audio"]["channel"] = json!("Left");
    doc["buffers"]["eeg_capacity"] = json!(2048);

    let config: PipelineConfig = serde_json::from_value(doc).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.eeg.window_size, 512);
    assert_eq!(config.eeg.artifact.amplitude_uv, Some(150.0));
    assert_eq!(config.eeg.hop_size(), 256);
}

#[test]
fn test_invalid_document_is_rejected_at_construction() {
    let mut doc = default_document();
    doc["buffers"]["eeg_capacity"] = json!(1000);
    let config: PipelineConfig = serde_json::from_value(doc).unwrap();

    let time = Arc::new(TimeSync::init(ManualCounter::new(1_000_000), config.drift).unwrap());
    let err = EegPipeline::with_buffer(&config, time, ChannelMask::first(8)).err().unwrap();
    assert_eq!(
        err,
        ProcessingError::Config(ConfigError::CapacityNotPowerOfTwo { field: "buffers.eeg", capacity: 1000 })
    );
}
