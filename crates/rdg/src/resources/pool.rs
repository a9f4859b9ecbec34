use std::sync::Arc;

use rdg_device::{Device, DeviceError, MemoryPlacement, ResourceDesc, ResourceId};

///Physical resource owned by a [ResourcePool].
///
/// The pool considers a resource free once it holds the only reference. Graphs hold a reference while they use it,
/// extracted resources hold one until the caller drops them.
#[derive(Debug)]
pub struct PooledResource {
    id: ResourceId,
    desc: ResourceDesc,
    name: String,
}

impl PooledResource {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    ///Name of the graph resource this was created for.
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct PoolEntry {
    resource: Arc<PooledResource>,
    last_use: u64,
}

impl PoolEntry {
    fn is_free(&self) -> bool {
        Arc::strong_count(&self.resource) == 1
    }
}

///Cache of durable resources, keyed by descriptor equality. Lives across graphs.
///
/// Every executed graph ticks the pool once. Free entries that were not used for `timeout` ticks are destroyed.
#[derive(Default)]
pub struct ResourcePool {
    ///Current epoch we are at
    epoch: u64,
    entries: Vec<PoolEntry>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    ///Returns a free resource matching `desc`, or creates one. The flag is true on a cache hit.
    pub(crate) fn acquire(
        &mut self,
        device: &dyn Device,
        desc: &ResourceDesc,
        name: &str,
    ) -> Result<(Arc<PooledResource>, bool), DeviceError> {
        //most recently used first, so rarely used entries can time out
        let candidate = self
            .entries
            .iter_mut()
            .filter(|e| e.is_free() && e.resource.desc == *desc)
            .max_by_key(|e| e.last_use);

        if let Some(entry) = candidate {
            entry.last_use = self.epoch;
            #[cfg(feature = "log_reasoning")]
            log::trace!(
                "Pool hit for {}, reusing {} ({})",
                name,
                entry.resource.id,
                entry.resource.name
            );
            return Ok((entry.resource.clone(), true));
        }

        let id = match desc {
            ResourceDesc::Texture(t) => device.create_texture(t, MemoryPlacement::Dedicated, name)?,
            ResourceDesc::Buffer(b) => device.create_buffer(b, MemoryPlacement::Dedicated, name)?,
        };
        #[cfg(feature = "log_reasoning")]
        log::trace!("Pool miss for {}, created {}", name, id);

        let resource = Arc::new(PooledResource {
            id,
            desc: *desc,
            name: name.to_owned(),
        });
        self.entries.push(PoolEntry {
            resource: resource.clone(),
            last_use: self.epoch,
        });
        Ok((resource, false))
    }

    ///Advances the epoch and destroys every free resource that timed out.
    pub fn tick(&mut self, device: &dyn Device, timeout: u64) {
        self.epoch += 1;
        let epoch = self.epoch;
        self.entries.retain(|entry| {
            let timed_out = entry.is_free() && entry.last_use + timeout < epoch;
            if timed_out {
                #[cfg(feature = "logging")]
                log::trace!(
                    "Removing pooled resource {} ({})",
                    entry.resource.id,
                    entry.resource.name
                );
                device.destroy(entry.resource.id);
            }
            !timed_out
        });
    }

    ///Destroys every free resource.
    pub fn clear(&mut self, device: &dyn Device) {
        self.entries.retain(|entry| {
            if entry.is_free() {
                device.destroy(entry.resource.id);
                false
            } else {
                true
            }
        });
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    ///Number of resources currently used by a graph or held as an extracted resource.
    pub fn in_use(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_free()).count()
    }
}
