use std::sync::Arc;

use parking_lot::Mutex;

use crate::resources::BufferHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommitOp {
    BufferSize {
        buffer: BufferHandle,
        element_count: u64,
    },
}

///Producer side of a graph's commit queue. Cheap to clone and usable from any thread, e.g. from a setup task.
#[derive(Clone)]
pub struct CommitSender {
    queue: Arc<Mutex<Vec<CommitOp>>>,
}

impl CommitSender {
    ///Commits the element count of a buffer created via
    /// [create_buffer_deferred](crate::RenderGraph::create_buffer_deferred). The last commit wins.
    pub fn commit_buffer_size(&self, buffer: BufferHandle, element_count: u64) {
        self.queue.lock().push(CommitOp::BufferSize {
            buffer,
            element_count,
        });
    }
}

///Single consumer side, drained once while compiling.
#[derive(Default)]
pub(crate) struct CommitQueue {
    queue: Arc<Mutex<Vec<CommitOp>>>,
}

impl CommitQueue {
    pub fn sender(&self) -> CommitSender {
        CommitSender {
            queue: self.queue.clone(),
        }
    }

    pub fn drain(&self) -> Vec<CommitOp> {
        std::mem::take(&mut *self.queue.lock())
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;

    #[test]
    fn many_producers_one_consumer() {
        let mut buffers: SlotMap<BufferHandle, ()> = SlotMap::with_key();
        let handles = (0..4).map(|_| buffers.insert(())).collect::<Vec<_>>();

        let queue = CommitQueue::default();
        let threads = handles
            .iter()
            .enumerate()
            .map(|(i, handle)| {
                let sender = queue.sender();
                let handle = *handle;
                std::thread::spawn(move || {
                    for n in 0..10 {
                        sender.commit_buffer_size(handle, (i * 100 + n) as u64);
                    }
                })
            })
            .collect::<Vec<_>>();
        for t in threads {
            t.join().unwrap();
        }

        let ops = queue.drain();
        assert_eq!(ops.len(), 40);
        //per producer the order is kept
        for (i, handle) in handles.iter().enumerate() {
            let counts = ops
                .iter()
                .filter_map(|op| match op {
                    CommitOp::BufferSize {
                        buffer,
                        element_count,
                    } if buffer == handle => Some(*element_count),
                    _ => None,
                })
                .collect::<Vec<_>>();
            assert_eq!(counts, (0..10).map(|n| (i * 100 + n) as u64).collect::<Vec<_>>());
        }
        assert!(queue.drain().is_empty());
    }
}
