//! Mapping between tensor device tags and engine memory types.

use cuda_memory::MemoryType;

/// Where a tensor claims to live, from the host environment's view.
///
/// The host side only distinguishes CPU from GPU; unified memory has no
/// tag of its own and is published as `Device`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceTag {
    Host,
    Device,
}

/// Memory type for storage allocated on behalf of a device tag.
pub fn memory_type_for(device: DeviceTag) -> MemoryType {
    match device {
        DeviceTag::Host => MemoryType::Host,
        DeviceTag::Device => MemoryType::Device,
    }
}

/// Device tag under which a memory type is published.
pub fn device_tag_for(memory_type: MemoryType) -> DeviceTag {
    match memory_type {
        MemoryType::Host => DeviceTag::Host,
        MemoryType::Device | MemoryType::Unified => DeviceTag::Device,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_is_total_and_stable() {
        for device in [DeviceTag::Host, DeviceTag::Device] {
            // Round trip through the memory type preserves the tag.
            assert_eq!(device_tag_for(memory_type_for(device)), device);
        }
        for memory_type in [MemoryType::Host, MemoryType::Device, MemoryType::Unified] {
            let _ = device_tag_for(memory_type);
        }
    }

    #[test]
    fn test_unified_publishes_as_device() {
        assert_eq!(device_tag_for(MemoryType::Unified), DeviceTag::Device);
    }
}
