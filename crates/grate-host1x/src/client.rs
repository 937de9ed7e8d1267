//! Device handle, engine clients and the submit/flush/wait protocol.

use core::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bo::BufferObject;
use crate::config::Host1xConfig;
use crate::device::{BoFlags, ChannelInfo, Device};
use crate::dummy::DummyDevice;
use crate::error::{Host1xError, Result};
use crate::fence::{Fence, Timeout, WaitOutcome};
use crate::job::Job;

/// Tries to bring up one kind of backend.
pub trait DeviceProbe: fmt::Debug {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when the backend is not available on this system.
    fn probe(&self, config: &Host1xConfig) -> Result<Option<Arc<dyn Device>>>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DummyProbe;

impl DeviceProbe for DummyProbe {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn probe(&self, config: &Host1xConfig) -> Result<Option<Arc<dyn Device>>> {
        Ok(Some(Arc::new(DummyDevice::new(config.dummy.clone()))))
    }
}

/// Probes tried by [`Host1x::open`], in order.
pub fn default_probes() -> Vec<Box<dyn DeviceProbe>> {
    vec![Box::new(DummyProbe)]
}

#[derive(Clone, Debug)]
pub struct Host1x {
    device: Arc<dyn Device>,
    config: Host1xConfig,
}

impl Host1x {
    pub fn open(config: Host1xConfig) -> Result<Self> {
        Self::open_with_probes(config, &default_probes())
    }

    /// Opens the first backend allowed by `config.backend` whose probe succeeds.
    pub fn open_with_probes(config: Host1xConfig, probes: &[Box<dyn DeviceProbe>]) -> Result<Self> {
        for probe in probes {
            if !config.backend.allows(probe.name()) {
                continue;
            }
            match probe.probe(&config) {
                Ok(Some(device)) => {
                    info!(backend = probe.name(), "opened host1x device");
                    return Ok(Self { device, config });
                }
                Ok(None) => debug!(backend = probe.name(), "backend not available"),
                Err(err) => warn!(backend = probe.name(), %err, "backend probe failed"),
            }
        }
        Err(Host1xError::NoBackend)
    }

    pub fn with_device(device: Arc<dyn Device>, config: Host1xConfig) -> Self {
        Self { device, config }
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn config(&self) -> &Host1xConfig {
        &self.config
    }

    pub fn bo_alloc(&self, size: u64, flags: BoFlags) -> Result<BufferObject> {
        BufferObject::allocate(&self.device, size, flags)
    }

    /// Opens a channel to the engine identified by `class`.
    pub fn open_client(&self, class: u32) -> Result<Client> {
        let channel = self.device.open_channel(class)?;
        debug!(class, channel = channel.id.0, syncpoints = ?channel.syncpoints, "opened client");
        Ok(Client {
            device: Arc::clone(&self.device),
            channel,
            default_timeout: self.config.default_timeout,
        })
    }

    pub fn syncpoint_value(&self, id: u32) -> Result<u32> {
        self.device.read_syncpoint(id)
    }

    pub fn wait_syncpoint(&self, id: u32, threshold: u32, timeout: Timeout) -> Result<WaitOutcome> {
        self.device.wait_syncpoint(id, threshold, timeout)
    }

    pub fn wait(&self, fence: Fence, timeout: Timeout) -> Result<WaitOutcome> {
        self.wait_syncpoint(fence.syncpoint, fence.value, timeout)
    }
}

/// A channel to one engine. Jobs built for it increment the client's syncpoints.
#[derive(Debug)]
pub struct Client {
    device: Arc<dyn Device>,
    channel: ChannelInfo,
    default_timeout: Timeout,
}

impl Client {
    pub fn class(&self) -> u32 {
        self.channel.class
    }

    pub fn channel(&self) -> &ChannelInfo {
        &self.channel
    }

    pub fn syncpoints(&self) -> &[u32] {
        &self.channel.syncpoints
    }

    /// The client's first syncpoint.
    pub fn syncpoint(&self) -> Result<u32> {
        self.channel
            .syncpoints
            .first()
            .copied()
            .ok_or(Host1xError::NoSyncpoint(0))
    }

    /// A job that increments the client's first syncpoint `increments` times.
    pub fn create_job(&self, increments: u32) -> Result<Job> {
        Ok(Job::new(self.syncpoint()?, increments))
    }

    /// Flushes every pushbuffer's written words and queues the job on the device.
    pub fn submit(&self, job: &mut Job) -> Result<()> {
        job.ensure_submittable()?;
        for pushbuf in job.pushbufs() {
            pushbuf.flush_written()?;
        }
        let submission = job.to_submission(self.channel.id)?;
        let value = self.device.submit(&submission)?;
        debug!(
            channel = self.channel.id.0,
            syncpoint = submission.syncpoint,
            increments = submission.increments,
            cmdbufs = submission.cmdbufs.len(),
            relocs = submission.relocs.len(),
            fence = value,
            "submitted job"
        );
        job.mark_submitted(Fence::new(submission.syncpoint, value));
        Ok(())
    }

    /// Pushes the submitted job to the engine and returns its completion fence.
    pub fn flush(&self, job: &mut Job) -> Result<Fence> {
        let fence = job.mark_flushed()?;
        self.device.flush_submissions(self.channel.id)?;
        Ok(fence)
    }

    pub fn wait(&self, fence: Fence, timeout: Timeout) -> Result<WaitOutcome> {
        self.device
            .wait_syncpoint(fence.syncpoint, fence.value, timeout)
    }

    /// Waits for a flushed job and records the outcome on it. A timed-out job may be waited
    /// on again.
    pub fn wait_job(&self, job: &mut Job, timeout: Timeout) -> Result<WaitOutcome> {
        let fence = job.waitable_fence()?;
        let outcome = self.wait(fence, timeout)?;
        debug!(
            syncpoint = fence.syncpoint,
            fence = fence.value,
            ?outcome,
            "waited on fence"
        );
        job.record_wait(outcome);
        Ok(outcome)
    }

    /// Submits, flushes and waits with the configured default timeout.
    pub fn finish(&self, job: &mut Job) -> Result<WaitOutcome> {
        self.submit(job)?;
        self.flush(job)?;
        self.wait_job(job, self.default_timeout)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Err(err) = self.device.close_channel(self.channel.id) {
            warn!(channel = self.channel.id.0, %err, "failed to close channel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendPreference;
    use crate::job::JobState;

    #[derive(Debug)]
    struct Unavailable;

    impl DeviceProbe for Unavailable {
        fn name(&self) -> &'static str {
            "tegra-drm"
        }

        fn probe(&self, _config: &Host1xConfig) -> Result<Option<Arc<dyn Device>>> {
            Ok(None)
        }
    }

    #[test]
    fn open_falls_through_unavailable_backends() {
        let probes: Vec<Box<dyn DeviceProbe>> = vec![Box::new(Unavailable), Box::new(DummyProbe)];
        let host1x = Host1x::open_with_probes(Host1xConfig::default(), &probes).unwrap();
        assert_eq!(host1x.device().name(), "dummy");
    }

    #[test]
    fn named_backend_must_exist() {
        let config = Host1xConfig {
            backend: BackendPreference::Named("tegra-drm".into()),
            ..Host1xConfig::default()
        };
        assert!(matches!(
            Host1x::open(config),
            Err(Host1xError::NoBackend)
        ));
    }

    #[test]
    fn submit_rejects_empty_and_repeated_submission() {
        let host1x = Host1x::open(Host1xConfig::default()).unwrap();
        let client = host1x.open_client(0x60).unwrap();
        let mut job = client.create_job(1).unwrap();
        assert!(matches!(client.submit(&mut job), Err(Host1xError::EmptyJob)));
        assert!(matches!(
            client.flush(&mut job),
            Err(Host1xError::InvalidState { .. })
        ));

        let bo = host1x.bo_alloc(64, BoFlags::empty()).unwrap();
        bo.map().unwrap();
        job.append(&bo, 0).unwrap().push(0).unwrap();
        client.submit(&mut job).unwrap();
        assert_eq!(job.state(), JobState::Submitted);
        assert!(matches!(
            client.submit(&mut job),
            Err(Host1xError::InvalidState {
                state: JobState::Submitted,
                ..
            })
        ));
        assert!(job.append(&bo, 0).is_err());
        assert!(matches!(
            client.wait_job(&mut job, Timeout::ZERO),
            Err(Host1xError::InvalidState { .. })
        ));
    }

    #[test]
    fn finish_runs_the_whole_protocol() {
        let host1x = Host1x::open(Host1xConfig::default()).unwrap();
        let client = host1x.open_client(0x60).unwrap();
        let bo = host1x.bo_alloc(64, BoFlags::empty()).unwrap();
        bo.map().unwrap();

        let mut job = client.create_job(1).unwrap();
        job.append(&bo, 0).unwrap().push(0).unwrap();
        assert_eq!(client.finish(&mut job).unwrap(), WaitOutcome::Completed);
        assert_eq!(job.state(), JobState::Complete);
        let fence = job.fence().unwrap();
        assert_eq!(host1x.syncpoint_value(fence.syncpoint).unwrap(), fence.value);
    }

    #[test]
    fn wait_job_reports_timeout_then_completion() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let dummy = Arc::new(DummyDevice::new(crate::config::DummyConfig {
            completion: crate::config::DummyCompletionMode::Deferred,
            ..crate::config::DummyConfig::default()
        }));
        let host1x = Host1x::with_device(dummy.clone(), Host1xConfig::default());
        let client = host1x.open_client(0x60).unwrap();
        let bo = host1x.bo_alloc(64, BoFlags::empty()).unwrap();
        bo.map().unwrap();

        let mut job = client.create_job(1).unwrap();
        job.append(&bo, 0).unwrap().push(0).unwrap();
        client.submit(&mut job).unwrap();
        client.flush(&mut job).unwrap();
        assert_eq!(
            client.wait_job(&mut job, Timeout::ZERO).unwrap(),
            WaitOutcome::TimedOut
        );
        assert_eq!(job.state(), JobState::TimedOut);

        dummy.run_pending();
        assert_eq!(
            client.wait_job(&mut job, Timeout::ZERO).unwrap(),
            WaitOutcome::Completed
        );
        assert_eq!(job.state(), JobState::Complete);
    }
}
