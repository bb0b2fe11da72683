//! Shared test support: an in-memory bus.

#![allow(dead_code)]

use async_trait::async_trait;
use nspawn_fleet::{Error, ImageInfo, JobPath, MachineBus, Result, WaitPolicy};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SERVICE_PREFIX: &str = "systemd-nspawn@";
const SERVICE_SUFFIX: &str = ".service";

/// Fast waits for tests.
pub fn quick_wait() -> WaitPolicy {
    WaitPolicy::fixed(Duration::from_millis(1), Duration::from_secs(2))
}

#[derive(Default)]
struct State {
    images: BTreeSet<String>,
    running: HashSet<String>,
    /// Reported machine state overriding `running`, e.g. `opening`.
    states: HashMap<String, String>,
    addresses: HashMap<String, Vec<IpAddr>>,
    /// Job path → polls left before the job object disappears.
    jobs: HashMap<String, usize>,
    job_polls: usize,
    next_job: u64,
    calls: Vec<String>,
}

/// [`MachineBus`] over in-memory state.
///
/// Start and stop jobs on `systemd-nspawn@<name>.service` flip the machine's
/// run state immediately; every call is recorded as `"<Method> <arg>"`.
#[derive(Default)]
pub struct MockBus {
    state: Mutex<State>,
}

impl MockBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_image(&self, name: &str) {
        self.lock().images.insert(name.to_string());
    }

    pub fn has_image(&self, name: &str) -> bool {
        self.lock().images.contains(name)
    }

    pub fn set_running(&self, name: &str, running: bool) {
        let mut state = self.lock();
        if running {
            state.running.insert(name.to_string());
        } else {
            state.running.remove(name);
        }
    }

    pub fn set_state(&self, name: &str, machine_state: &str) {
        self.lock()
            .states
            .insert(name.to_string(), machine_state.to_string());
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.lock().running.contains(name)
    }

    pub fn set_addresses(&self, name: &str, addrs: &[&str]) {
        let addrs = addrs.iter().map(|a| a.parse().unwrap()).collect();
        self.lock().addresses.insert(name.to_string(), addrs);
    }

    /// Makes every new job report `running` for `polls` state reads.
    pub fn set_job_polls(&self, polls: usize) {
        self.lock().job_polls = polls;
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls of `method`.
    pub fn count(&self, method: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(method))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn record(state: &mut State, method: &str, arg: &str) {
        state.calls.push(format!("{} {}", method, arg).trim_end().to_string());
    }

    fn enqueue(state: &mut State) -> JobPath {
        state.next_job += 1;
        let path = format!("/org/freedesktop/systemd1/job/{}", state.next_job);
        if state.job_polls > 0 {
            state.jobs.insert(path.clone(), state.job_polls);
        }
        JobPath(path)
    }

    fn machine_of(unit: &str) -> Option<&str> {
        unit.strip_prefix(SERVICE_PREFIX)?
            .strip_suffix(SERVICE_SUFFIX)
    }
}

#[async_trait]
impl MachineBus for MockBus {
    async fn list_images(&self) -> Result<Vec<ImageInfo>> {
        let mut state = self.lock();
        Self::record(&mut state, "ListImages", "");
        Ok(state
            .images
            .iter()
            .map(|name| ImageInfo {
                name: name.clone(),
                path: format!("/org/freedesktop/machine1/image/{}", name),
            })
            .collect())
    }

    async fn get_image(&self, name: &str) -> Result<ImageInfo> {
        let mut state = self.lock();
        Self::record(&mut state, "GetImage", name);
        if !state.images.contains(name) {
            return Err(Error::NoSuchImage(name.to_string()));
        }
        Ok(ImageInfo {
            name: name.to_string(),
            path: format!("/org/freedesktop/machine1/image/{}", name),
        })
    }

    async fn clone_image(&self, source: &str, target: &str) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, "CloneImage", &format!("{} {}", source, target));
        if !state.images.contains(source) {
            return Err(Error::NoSuchImage(source.to_string()));
        }
        if !state.images.insert(target.to_string()) {
            return Err(Error::AlreadyExists(target.to_string()));
        }
        Ok(())
    }

    async fn remove_image(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, "RemoveImage", name);
        if !state.images.remove(name) {
            return Err(Error::NoSuchImage(name.to_string()));
        }
        state.running.remove(name);
        Ok(())
    }

    async fn machine_state(&self, name: &str) -> Result<Option<String>> {
        let state = self.lock();
        if let Some(reported) = state.states.get(name) {
            return Ok(Some(reported.clone()));
        }
        Ok(state
            .running
            .contains(name)
            .then(|| "running".to_string()))
    }

    async fn machine_addresses(&self, name: &str) -> Result<Vec<IpAddr>> {
        let state = self.lock();
        if !state.running.contains(name) {
            return Err(Error::NoSuchMachine(name.to_string()));
        }
        Ok(state.addresses.get(name).cloned().unwrap_or_default())
    }

    async fn start_unit(&self, unit: &str) -> Result<JobPath> {
        let mut state = self.lock();
        Self::record(&mut state, "StartUnit", unit);
        if let Some(name) = Self::machine_of(unit) {
            state.running.insert(name.to_string());
        }
        Ok(Self::enqueue(&mut state))
    }

    async fn stop_unit(&self, unit: &str) -> Result<JobPath> {
        let mut state = self.lock();
        Self::record(&mut state, "StopUnit", unit);
        if let Some(name) = Self::machine_of(unit) {
            state.running.remove(name);
        }
        Ok(Self::enqueue(&mut state))
    }

    async fn reload(&self) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, "Reload", "");
        Ok(())
    }

    async fn job_state(&self, job: &JobPath) -> Result<Option<String>> {
        let mut state = self.lock();
        match state.jobs.get_mut(&job.0) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Ok(Some("running".to_string()))
            }
            _ => {
                state.jobs.remove(&job.0);
                Ok(None)
            }
        }
    }
}
