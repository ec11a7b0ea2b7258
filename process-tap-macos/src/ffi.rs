//! Property selectors and HAL entry points not covered by the binding crates.

#![allow(non_snake_case)]

use core_foundation::dictionary::CFDictionaryRef;
use coreaudio_sys::{AudioObjectID, OSStatus};

use crate::status::selector;

pub(crate) const SCOPE_GLOBAL: u32 = selector(b"glob");
pub(crate) const SCOPE_INPUT: u32 = selector(b"inpt");
pub(crate) const ELEMENT_MAIN: u32 = 0;

/// `kAudioHardwarePropertyTranslatePIDToProcessObject`, qualified by a pid.
pub(crate) const TRANSLATE_PID_TO_PROCESS_OBJECT: u32 = selector(b"id2p");
/// `kAudioHardwarePropertyProcessObjectList`
pub(crate) const PROCESS_OBJECT_LIST: u32 = selector(b"prs#");
/// `kAudioHardwarePropertyDefaultOutputDevice`
pub(crate) const DEFAULT_OUTPUT_DEVICE: u32 = selector(b"dOut");
/// `kAudioProcessPropertyPID`
pub(crate) const PROCESS_PID: u32 = selector(b"ppid");
/// `kAudioDevicePropertyDeviceUID`
pub(crate) const DEVICE_UID: u32 = selector(b"uid ");
/// `kAudioDevicePropertyStreamConfiguration`, an `AudioBufferList`.
pub(crate) const STREAM_CONFIGURATION: u32 = selector(b"slay");
/// `kAudioDevicePropertyDeviceIsAlive`
pub(crate) const DEVICE_IS_ALIVE: u32 = selector(b"livn");
/// `kAudioTapPropertyUID`
pub(crate) const TAP_UID: u32 = selector(b"tuid");
/// `kAudioTapPropertyFormat`
pub(crate) const TAP_FORMAT: u32 = selector(b"tfmt");

#[link(name = "CoreAudio", kind = "framework")]
extern "C" {
    pub(crate) fn AudioHardwareCreateAggregateDevice(
        in_description: CFDictionaryRef,
        out_device_object_id: *mut AudioObjectID,
    ) -> OSStatus;

    pub(crate) fn AudioHardwareDestroyAggregateDevice(in_device_object_id: AudioObjectID) -> OSStatus;
}
