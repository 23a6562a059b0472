// [apps/netd/src/allocator.rs]
use octolab_netd_proto::naming::{derive_device_names, Ipv4Pool};
use octolab_netd_proto::DeviceNames;

use crate::store::AllocationRecord;

pub struct Allocator {
    pool: Ipv4Pool,
}

impl Allocator {
    pub fn new(pool: Ipv4Pool) -> Self {
        Allocator { pool }
    }

    pub fn allocate(&self, lab_id: &str, taken_blocks: &std::collections::HashSet<u32>) -> Option<AllocationRecord> {
        let DeviceNames { bridge_name, tap_name } = derive_device_names(lab_id);
        let allocation = self.pool.allocate(lab_id, taken_blocks)?;
        Some(AllocationRecord {
            lab_id: lab_id.to_string(),
            bridge_name,
            tap_name,
            host_ip: allocation.host_ip,
            guest_ip: allocation.guest_ip,
            netmask: allocation.netmask,
            block_index: allocation.block_index,
        })
    }
}
