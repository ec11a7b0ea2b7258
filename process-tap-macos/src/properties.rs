//! Typed reads of HAL object properties.

use std::ffi::c_void;
use std::mem::{self, MaybeUninit};
use std::ptr;

use core_foundation::base::TCFType;
use core_foundation::string::{CFString, CFStringRef};
use coreaudio_sys::{
    AudioBuffer, AudioBufferList, AudioObjectGetPropertyData, AudioObjectGetPropertyDataSize, AudioObjectID,
    AudioObjectPropertyAddress,
};

use crate::ffi::{ELEMENT_MAIN, SCOPE_GLOBAL, STREAM_CONFIGURATION};
use crate::status::{check, fourcc};

fn address(selector: u32) -> AudioObjectPropertyAddress {
    scoped_address(selector, SCOPE_GLOBAL)
}

pub(crate) fn scoped_address(selector: u32, scope: u32) -> AudioObjectPropertyAddress {
    AudioObjectPropertyAddress {
        mSelector: selector,
        mScope: scope,
        mElement: ELEMENT_MAIN,
    }
}

fn context(object: AudioObjectID, selector: u32) -> String {
    let name = fourcc(selector as i32).unwrap_or_else(|| format!("{:#010x}", selector));
    format!("get {} of audio object {}", name, object)
}

/// Read a fixed-size property into `T`.
///
/// # Safety
/// `T` must be plain data matching the property's layout, valid when zeroed.
pub(crate) unsafe fn read_value<T: Copy>(
    object: AudioObjectID,
    selector: u32,
    qualifier: Option<&u32>,
) -> Result<T, String> {
    let address = address(selector);
    let mut value = MaybeUninit::<T>::zeroed();
    let mut size = mem::size_of::<T>() as u32;
    let (qualifier_size, qualifier_data) = match qualifier {
        Some(q) => (mem::size_of::<u32>() as u32, q as *const u32 as *const c_void),
        None => (0, ptr::null()),
    };
    let status = AudioObjectGetPropertyData(
        object,
        &address,
        qualifier_size,
        qualifier_data,
        &mut size,
        value.as_mut_ptr() as *mut c_void,
    );
    check(&context(object, selector), status)?;
    if size as usize != mem::size_of::<T>() {
        return Err(format!(
            "{}: expected {} bytes, got {}",
            context(object, selector),
            mem::size_of::<T>(),
            size
        ));
    }
    Ok(value.assume_init())
}

/// Read an array of object ids (process lists, device lists).
pub(crate) fn read_object_list(object: AudioObjectID, selector: u32) -> Result<Vec<AudioObjectID>, String> {
    let address = address(selector);
    let mut size = 0u32;
    let status = unsafe { AudioObjectGetPropertyDataSize(object, &address, 0, ptr::null(), &mut size) };
    check(&context(object, selector), status)?;

    let mut ids: Vec<AudioObjectID> = vec![0; size as usize / mem::size_of::<AudioObjectID>()];
    if ids.is_empty() {
        return Ok(ids);
    }
    let status = unsafe {
        AudioObjectGetPropertyData(
            object,
            &address,
            0,
            ptr::null(),
            &mut size,
            ids.as_mut_ptr() as *mut c_void,
        )
    };
    check(&context(object, selector), status)?;
    ids.truncate(size as usize / mem::size_of::<AudioObjectID>());
    Ok(ids)
}

/// Read a `CFStringRef` property. The HAL returns it retained.
pub(crate) fn read_string(object: AudioObjectID, selector: u32) -> Result<String, String> {
    let raw: CFStringRef = unsafe { read_value(object, selector, None)? };
    if raw.is_null() {
        return Err(format!("{}: null string", context(object, selector)));
    }
    let string = unsafe { CFString::wrap_under_create_rule(raw) };
    Ok(string.to_string())
}

/// Channel count of each buffer in a device's stream configuration for
/// `scope`, in buffer-list order.
pub(crate) fn read_buffer_channels(device: AudioObjectID, scope: u32) -> Result<Vec<u32>, String> {
    let address = scoped_address(STREAM_CONFIGURATION, scope);
    let context = context(device, STREAM_CONFIGURATION);
    let mut size = 0u32;
    let status = unsafe { AudioObjectGetPropertyDataSize(device, &address, 0, ptr::null(), &mut size) };
    check(&context, status)?;

    let header = mem::offset_of!(AudioBufferList, mBuffers);
    if (size as usize) < header {
        return Ok(Vec::new());
    }

    // u64 storage keeps the list's pointer fields aligned.
    let mut storage = vec![0u64; (size as usize).div_ceil(mem::size_of::<u64>())];
    let status = unsafe {
        AudioObjectGetPropertyData(
            device,
            &address,
            0,
            ptr::null(),
            &mut size,
            storage.as_mut_ptr() as *mut c_void,
        )
    };
    check(&context, status)?;

    // SAFETY: the HAL wrote an `AudioBufferList` of `size` bytes into storage.
    let list = unsafe { &*(storage.as_ptr() as *const AudioBufferList) };
    let fits = (size as usize).saturating_sub(header) / mem::size_of::<AudioBuffer>();
    let count = (list.mNumberBuffers as usize).min(fits);
    let buffers = unsafe { std::slice::from_raw_parts(list.mBuffers.as_ptr(), count) };
    Ok(buffers.iter().map(|b| b.mNumberChannels).collect())
}
