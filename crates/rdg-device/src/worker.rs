use std::{panic::AssertUnwindSafe, thread::JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::DeviceError;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

///Something that can run jobs asynchronously.
pub trait Workers: Send + Sync {
    fn spawn(&self, job: Job) -> Result<(), DeviceError>;
    ///Number of jobs that can make progress at the same time.
    fn parallelism(&self) -> usize;
}

///Runs every job immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineWorkers;

impl Workers for InlineWorkers {
    fn spawn(&self, job: Job) -> Result<(), DeviceError> {
        job();
        Ok(())
    }

    fn parallelism(&self) -> usize {
        1
    }
}

///Fixed size pool of threads pulling jobs from a shared channel.
pub struct ThreadPool {
    sender: Option<Sender<Job>>,
    threads: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(thread_count: usize) -> Result<Self, DeviceError> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let threads = (0..thread_count.max(1))
            .map(|idx| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("rdg-worker-{idx}"))
                    .spawn(move || Self::work(receiver))
                    .map_err(|e| DeviceError::WorkerSpawn(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ThreadPool {
            sender: Some(sender),
            threads,
        })
    }

    ///Creates a pool with one thread per available core.
    pub fn with_available_parallelism() -> Result<Self, DeviceError> {
        let count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::new(count)
    }

    fn work(receiver: Receiver<Job>) {
        while let Ok(job) = receiver.recv() {
            //A panicking job drops its result sender, which is reported to the waiting side.
            if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                #[cfg(feature = "logging")]
                log::error!("Worker job panicked");
            }
        }
    }
}

impl Workers for ThreadPool {
    fn spawn(&self, job: Job) -> Result<(), DeviceError> {
        self.sender
            .as_ref()
            .ok_or(DeviceError::WorkerDisconnected)?
            .send(job)
            .map_err(|_| DeviceError::WorkerDisconnected)
    }

    fn parallelism(&self) -> usize {
        self.threads.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        //closing the channel ends every worker loop
        self.sender.take();
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn pool_runs_all_jobs() {
        let workers: Arc<dyn Workers> = Arc::new(ThreadPool::new(3).unwrap());
        let counter = Arc::new(AtomicUsize::new(0));
        let (sender, receiver) = crossbeam_channel::unbounded();
        for i in 0..32u32 {
            let counter = counter.clone();
            let sender = sender.clone();
            workers
                .spawn(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    sender.send(i * 2).unwrap();
                }))
                .unwrap();
        }
        drop(sender);

        let mut results = receiver.iter().collect::<Vec<_>>();
        results.sort();
        assert_eq!(counter.load(Ordering::SeqCst), 32);
        assert_eq!(results, (0..32).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn panicking_job_drops_its_sender() {
        let workers: Arc<dyn Workers> = Arc::new(ThreadPool::new(1).unwrap());
        let (sender, receiver) = crossbeam_channel::bounded::<u32>(1);
        workers
            .spawn(Box::new(move || {
                let _sender = sender;
                panic!("boom");
            }))
            .unwrap();
        assert!(receiver.recv().is_err());

        //pool is still usable afterwards
        let (sender, receiver) = crossbeam_channel::bounded(1);
        workers
            .spawn(Box::new(move || sender.send(5u32).unwrap()))
            .unwrap();
        assert_eq!(receiver.recv(), Ok(5));
    }

    #[test]
    fn inline_runs_immediately() {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        InlineWorkers
            .spawn(Box::new(move || sender.send(1u8).unwrap()))
            .unwrap();
        assert_eq!(receiver.try_recv(), Ok(1));
    }
}
