//! Private aggregate device wrapping a process tap.
//!
//! A tap has no IO of its own; it is read through an aggregate device that
//! lists it under `taps`. The default output device joins as main sub-device
//! when one exists so the aggregate has a real clock, and the tap gets drift
//! compensation against it.

use core_foundation::array::CFArray;
use core_foundation::base::{CFType, TCFType};
use core_foundation::boolean::CFBoolean;
use core_foundation::dictionary::CFDictionary;
use core_foundation::string::CFString;
use coreaudio_sys::{kAudioObjectSystemObject, AudioObjectID};

use process_tap_core::{CaptureError, NativeResource};

use crate::ffi::{AudioHardwareCreateAggregateDevice, AudioHardwareDestroyAggregateDevice, DEFAULT_OUTPUT_DEVICE, DEVICE_UID};
use crate::properties::{read_string, read_value};
use crate::status::check;

pub(crate) const AGGREGATE_DEVICE: &str = "aggregate-device";

pub(crate) struct AggregateParams<'a> {
    pub name: &'a str,
    pub uid: &'a str,
    pub tap_uid: &'a str,
    pub main_device_uid: Option<&'a str>,
}

fn key(name: &str) -> CFString {
    CFString::new(name)
}

fn string(value: &str) -> CFType {
    CFString::new(value).as_CFType()
}

fn flag(value: bool) -> CFType {
    if value {
        CFBoolean::true_value().as_CFType()
    } else {
        CFBoolean::false_value().as_CFType()
    }
}

fn description(params: &AggregateParams<'_>) -> CFDictionary<CFString, CFType> {
    let tap = CFDictionary::from_CFType_pairs(&[(key("uid"), string(params.tap_uid)), (key("drift"), flag(true))]);

    let mut pairs = vec![
        (key("name"), string(params.name)),
        (key("uid"), string(params.uid)),
        (key("private"), flag(true)),
        (key("stacked"), flag(false)),
        (key("tapautostart"), flag(true)),
        (key("taps"), CFArray::from_CFTypes(&[tap]).as_CFType()),
    ];

    if let Some(main) = params.main_device_uid {
        let sub_device = CFDictionary::from_CFType_pairs(&[(key("uid"), string(main))]);
        pairs.push((key("master"), string(main)));
        pairs.push((key("subdevices"), CFArray::from_CFTypes(&[sub_device]).as_CFType()));
    }

    CFDictionary::from_CFType_pairs(&pairs)
}

/// Create the aggregate device. It is destroyed when the guard is released.
pub(crate) fn create_aggregate(params: &AggregateParams<'_>) -> Result<NativeResource<AudioObjectID>, CaptureError> {
    let description = description(params);
    let mut device: AudioObjectID = 0;
    let status = unsafe { AudioHardwareCreateAggregateDevice(description.as_concrete_TypeRef(), &mut device) };
    check("AudioHardwareCreateAggregateDevice", status).map_err(CaptureError::ActivationFailed)?;
    log::debug!("Aggregate device {} ({}) created", device, params.uid);

    Ok(NativeResource::new(AGGREGATE_DEVICE, device, |device| {
        let status = unsafe { AudioHardwareDestroyAggregateDevice(device) };
        check("AudioHardwareDestroyAggregateDevice", status).map_err(CaptureError::TeardownFailed)
    }))
}

/// UID of the default output device, used as the aggregate's clock.
pub(crate) fn default_output_uid() -> Option<String> {
    let device: AudioObjectID = match unsafe { read_value(kAudioObjectSystemObject, DEFAULT_OUTPUT_DEVICE, None) } {
        Ok(0) => return None,
        Ok(device) => device,
        Err(e) => {
            log::debug!("No default output device: {}", e);
            return None;
        }
    };
    read_string(device, DEVICE_UID)
        .map_err(|e| log::debug!("Default output device has no UID: {}", e))
        .ok()
}
