use kernel_memory_addresses::PhysicalAddress;

#[derive(Debug, thiserror::Error)]
pub enum PmmError {
    #[error("no usable region large enough for a {0}-byte page descriptor array")]
    NoRoomForDescriptors(u64),
    #[error("physical address {0} is not page-aligned")]
    Unaligned(PhysicalAddress),
    #[error("size in pages exceeds the largest representable buddy order")]
    OrderTooLarge,
}
