//! C10 — SharedMemoryManager (SPEC_FULL.md §4.10): attach-or-create protocol
//! over a POSIX shared-memory segment, guarded by a named file lock standing
//! in for a named mutex (no POSIX named-mutex crate in the ecosystem; a
//! `flock`'d lock file under `/dev/shm` gives the same cross-process
//! exclusion).

use std::collections::HashMap;
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use memmap2::MmapMut;
use nix::fcntl::{flock, FlockArg, OFlag};
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use regfab_types::{RegisterAccessError, RuntimeError};
use tracing::{info, info_span, warn};

/// Bound on simultaneously-attached processes (spec.md §4.10).
pub const SHARED_MEMORY_N_MAX_MEMBER: usize = 32;

/// Bound on simultaneously-distinct interrupt domains the
/// InterruptDispatcherInterface sub-region tracks (spec.md §4.10's "unique-
/// instance allocation"); a domain id maps onto a slot by `% capacity`, so
/// two domains sharing a slot just means one spurious cross-process poll.
pub const INTERRUPT_DISPATCH_CAPACITY: usize = 256;

const REQUIRED_VERSION: u32 = 1;
const LOCK_TIMEOUT: Duration = Duration::from_secs(2);
const LOCK_RETRY_ATTEMPTS: u32 = 3;
const HEADER_SIZE: usize = 4 + SHARED_MEMORY_N_MAX_MEMBER * 4;
const INTERRUPT_REGION_SIZE: usize = INTERRUPT_DISPATCH_CAPACITY * 4;
const DISPATCHER_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// File-lock-backed stand-in for a named OS mutex.
struct NamedMutex {
    file: File,
    path: PathBuf,
}

impl NamedMutex {
    fn open_or_create(name: &str) -> std::io::Result<Self> {
        let path = PathBuf::from(format!("/dev/shm/{name}.lock"));
        let file = OpenOptions::new().create(true).read(true).write(true).open(&path)?;
        Ok(Self { file, path })
    }

    fn try_lock_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if flock(self.file.as_raw_fd(), FlockArg::LockExclusiveNonblock).is_ok() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    fn unlock(&self) {
        let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
    }

    fn destroy(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Opens the named mutex and locks it, recreating it (assuming the previous
/// holder died) if the lock cannot be acquired within [`LOCK_TIMEOUT`],
/// finitely many times (spec.md §4.10 steps 1-2).
fn lock_with_recovery(name: &str) -> Result<NamedMutex, RegisterAccessError> {
    let mut mutex = NamedMutex::open_or_create(name)
        .map_err(|e| RuntimeError::Other(format!("could not open named mutex '{name}': {e}")))?;
    for attempt in 1..=LOCK_RETRY_ATTEMPTS {
        if mutex.try_lock_for(LOCK_TIMEOUT) {
            return Ok(mutex);
        }
        warn!(name, attempt, "named mutex lock timed out, assuming the holder died; recreating it");
        mutex.destroy();
        mutex = NamedMutex::open_or_create(name)
            .map_err(|e| RuntimeError::Other(format!("could not recreate named mutex '{name}': {e}")))?;
    }
    Err(RuntimeError::ResourceExhausted(format!("could not acquire named mutex '{name}' after {LOCK_RETRY_ATTEMPTS} attempts")).into())
}

fn shm_name_for(instance_id: &str, map_file_name: &str, user_name: &str) -> String {
    let mut hasher = seahash::SeaHasher::new();
    instance_id.hash(&mut hasher);
    map_file_name.hash(&mut hasher);
    user_name.hash(&mut hasher);
    format!("regfab-dummy-{:016x}", hasher.finish())
}

fn open_or_create_segment(name: &str, size: usize) -> Result<MmapMut, RegisterAccessError> {
    let cname = CString::new(format!("/{name}")).expect("shm segment name has no interior NUL");
    let fd = shm_open(&*cname, OFlag::O_CREAT | OFlag::O_RDWR, Mode::S_IRUSR | Mode::S_IWUSR)
        .map_err(|e| RuntimeError::Other(format!("shm_open('{name}') failed: {e}")))?;
    let file = unsafe { File::from_raw_fd(fd) };
    ftruncate(&file, size as i64).map_err(|e| RuntimeError::Other(format!("ftruncate('{name}') failed: {e}")))?;
    let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| RuntimeError::Other(format!("mmap('{name}') failed: {e}")))?;
    Ok(mmap)
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn read_pid_set(header: &[u8]) -> Vec<i32> {
    (0..SHARED_MEMORY_N_MAX_MEMBER)
        .filter_map(|slot| {
            let pid = read_u32(header, 4 + slot * 4) as i32;
            if pid == 0 {
                None
            } else {
                Some(pid)
            }
        })
        .collect()
}

fn write_pid_set(header: &mut [u8], pids: &[i32]) {
    for slot in 0..SHARED_MEMORY_N_MAX_MEMBER {
        let pid = pids.get(slot).copied().unwrap_or(0);
        write_u32(header, 4 + slot * 4, pid as u32);
    }
}

fn domain_slot(domain_id: u32) -> usize {
    domain_id as usize % INTERRUPT_DISPATCH_CAPACITY
}

fn process_alive(pid: i32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

/// Cross-process view of a simulated device's BARs: one shared-memory
/// segment per BAR plus a header segment holding `requiredVersion` and the
/// participating-process `pidSet`, all guarded by one named mutex.
pub struct SharedMemoryManager {
    shm_name: String,
    mutex: NamedMutex,
    bars: HashMap<u32, Mutex<MmapMut>>,
    own_pid: i32,
    interrupt_region: Mutex<MmapMut>,
    interrupt_callback: Mutex<Option<Arc<dyn Fn(u32) + Send + Sync>>>,
    dispatcher_stop: Arc<AtomicBool>,
    dispatcher_thread: Mutex<Option<JoinHandle<()>>>,
}

impl SharedMemoryManager {
    /// Attach-or-create protocol (spec.md §4.10): locks the named mutex
    /// (recovering from a stale lock if necessary), finds or constructs the
    /// header, reaps dead members, reinitializes BAR memory if the previous
    /// generation is entirely gone, and registers this process's pid. Also
    /// starts the interrupt-dispatcher thread (spec.md §5) that watches the
    /// InterruptDispatcherInterface sub-region for notifications from other
    /// attached processes.
    pub fn attach(instance_id: &str, map_file_name: &str, bar_sizes: &HashMap<u32, u64>) -> Result<Arc<Self>, RegisterAccessError> {
        let user_name = std::env::var("USER").unwrap_or_else(|_| "unknown".into());
        let shm_name = shm_name_for(instance_id, map_file_name, &user_name);
        let mutex = lock_with_recovery(&format!("{shm_name}.mutex"))?;

        let result = (|| {
            let mut header = open_or_create_segment(&format!("{shm_name}.hdr"), HEADER_SIZE)?;
            let required_version = read_u32(&header, 0);
            if required_version == 0 {
                write_u32(&mut header, 0, REQUIRED_VERSION);
            } else if required_version != REQUIRED_VERSION {
                return Err(RuntimeError::ProtocolVersion(format!(
                    "shared memory segment '{shm_name}' has requiredVersion {required_version}, this build expects {REQUIRED_VERSION}"
                ))
                .into());
            }

            let mut pids = read_pid_set(&header);
            let had_members = !pids.is_empty();
            pids.retain(|&pid| process_alive(pid));
            let reinit = had_members && pids.is_empty();
            if pids.len() >= SHARED_MEMORY_N_MAX_MEMBER {
                return Err(RuntimeError::ResourceExhausted(format!(
                    "shared memory segment '{shm_name}' already has the maximum {SHARED_MEMORY_N_MAX_MEMBER} members"
                ))
                .into());
            }
            let own_pid = std::process::id() as i32;
            pids.push(own_pid);
            write_pid_set(&mut header, &pids);

            let mut bars = HashMap::new();
            for (&bar, &size) in bar_sizes {
                let mut mmap = open_or_create_segment(&format!("{shm_name}.bar{bar}"), size as usize)?;
                if reinit {
                    mmap.fill(0);
                }
                bars.insert(bar, Mutex::new(mmap));
            }
            let mut interrupt_region = open_or_create_segment(&format!("{shm_name}.irq"), INTERRUPT_REGION_SIZE)?;
            if reinit {
                interrupt_region.fill(0);
                info!(shm_name, "previous generation's members all died, reinitialized BAR memory");
            }
            Ok((bars, own_pid, interrupt_region))
        })();

        mutex.unlock();
        let (bars, own_pid, interrupt_region) = result?;
        let manager = Arc::new(Self {
            shm_name,
            mutex,
            bars,
            own_pid,
            interrupt_region: Mutex::new(interrupt_region),
            interrupt_callback: Mutex::new(None),
            dispatcher_stop: Arc::new(AtomicBool::new(false)),
            dispatcher_thread: Mutex::new(None),
        });
        Self::spawn_dispatcher(&manager);
        Ok(manager)
    }

    /// Installs the callback the dispatcher thread invokes with a domain id
    /// whose generation counter it observed advance from another process.
    pub fn set_interrupt_callback(&self, callback: impl Fn(u32) + Send + Sync + 'static) {
        *self.interrupt_callback.lock().unwrap() = Some(Arc::new(callback));
    }

    /// Bumps `domainId`'s generation counter in the InterruptDispatcherInterface
    /// sub-region, so every other attached process's dispatcher thread picks
    /// it up on its next poll.
    pub fn notify_interrupt(&self, domain_id: u32) {
        let mut region = self.interrupt_region.lock().unwrap();
        let slot = domain_slot(domain_id) * 4;
        let current = read_u32(&region, slot);
        write_u32(&mut region, slot, current.wrapping_add(1));
    }

    fn interrupt_generations(&self) -> Vec<u32> {
        let region = self.interrupt_region.lock().unwrap();
        (0..INTERRUPT_DISPATCH_CAPACITY).map(|slot| read_u32(&region, slot * 4)).collect()
    }

    /// Polls the InterruptDispatcherInterface sub-region at a fixed interval;
    /// a changed slot not caused by our own `notify_interrupt` call means
    /// another process triggered that domain, so the installed callback (the
    /// `SharedDummyBackend`'s local distribution) runs for it.
    fn spawn_dispatcher(self_arc: &Arc<Self>) {
        let weak = Arc::downgrade(self_arc);
        let stop = self_arc.dispatcher_stop.clone();
        let mut last_seen = self_arc.interrupt_generations();
        let handle = std::thread::spawn(move || {
            let _span = info_span!("shared_memory_manager.interrupt_dispatcher").entered();
            while !stop.load(Ordering::Acquire) {
                std::thread::sleep(DISPATCHER_POLL_INTERVAL);
                let Some(manager) = weak.upgrade() else { break };
                let current = manager.interrupt_generations();
                for (slot, (&before, &after)) in last_seen.iter().zip(current.iter()).enumerate() {
                    if before != after {
                        if let Some(cb) = manager.interrupt_callback.lock().unwrap().as_ref() {
                            cb(slot as u32);
                        }
                    }
                }
                last_seen = current;
            }
        });
        *self_arc.dispatcher_thread.lock().unwrap() = Some(handle);
    }

    pub fn bar_size(&self, bar: u32) -> Option<u64> {
        self.bars.get(&bar).map(|m| m.lock().unwrap().len() as u64)
    }

    pub fn read(&self, bar: u32, address: u64, data: &mut [u8]) -> Result<(), RegisterAccessError> {
        let mmap = self.bars.get(&bar).ok_or_else(|| RuntimeError::Other(format!("BAR {bar} does not exist on this device")))?;
        let guard = mmap.lock().unwrap();
        let start = address as usize;
        let end = start + data.len();
        if end > guard.len() {
            return Err(RuntimeError::Other(format!("read of {} bytes at {start:#x} exceeds BAR {bar} ({} bytes)", data.len(), guard.len())).into());
        }
        data.copy_from_slice(&guard[start..end]);
        Ok(())
    }

    pub fn write(&self, bar: u32, address: u64, data: &[u8]) -> Result<(), RegisterAccessError> {
        let mmap = self.bars.get(&bar).ok_or_else(|| RuntimeError::Other(format!("BAR {bar} does not exist on this device")))?;
        let mut guard = mmap.lock().unwrap();
        let start = address as usize;
        let end = start + data.len();
        if end > guard.len() {
            return Err(RuntimeError::Other(format!("write of {} bytes at {start:#x} exceeds BAR {bar} ({} bytes)", data.len(), guard.len())).into());
        }
        guard[start..end].copy_from_slice(data);
        Ok(())
    }
}

/// Removes this process's pid, and if it was the last member, removes the
/// shared-memory segments and the lock file. A mutex that cannot be acquired
/// here leaves shared state in an unknown condition, so the process aborts
/// rather than risk corrupting it for the remaining members (spec.md
/// §4.10's "mutex operations that throw terminate the process").
impl Drop for SharedMemoryManager {
    fn drop(&mut self) {
        self.dispatcher_stop.store(true, Ordering::Release);
        if let Some(handle) = self.dispatcher_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        if !self.mutex.try_lock_for(LOCK_TIMEOUT) {
            tracing::error!(shm_name = %self.shm_name, "could not acquire shared memory mutex during detach");
            std::process::abort();
        }
        let became_empty = (|| -> Result<bool, RegisterAccessError> {
            let mut header = open_or_create_segment(&format!("{}.hdr", self.shm_name), HEADER_SIZE)?;
            let mut pids = read_pid_set(&header);
            pids.retain(|&pid| pid != self.own_pid);
            let empty = pids.is_empty();
            write_pid_set(&mut header, &pids);
            Ok(empty)
        })()
        .unwrap_or(false);
        self.mutex.unlock();

        if became_empty {
            info!(shm_name = %self.shm_name, "last member detached, removing shared memory");
            let _ = shm_unlink(&*CString::new(format!("/{}.hdr", self.shm_name)).unwrap());
            let _ = shm_unlink(&*CString::new(format!("/{}.irq", self.shm_name)).unwrap());
            for bar in self.bars.keys() {
                let _ = shm_unlink(&*CString::new(format!("/{}.bar{bar}", self.shm_name)).unwrap());
            }
            self.mutex.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_handles_in_one_process_share_bar_state() {
        let mut bar_sizes = HashMap::new();
        bar_sizes.insert(0u32, 64u64);
        let instance = format!("test-{}", std::process::id());

        let a = SharedMemoryManager::attach(&instance, "unit.map", &bar_sizes).unwrap();
        let b = SharedMemoryManager::attach(&instance, "unit.map", &bar_sizes).unwrap();

        a.write(0, 8, &[1, 2, 3, 4]).unwrap();
        let mut readback = [0u8; 4];
        b.read(0, 8, &mut readback).unwrap();
        assert_eq!(readback, [1, 2, 3, 4]);
    }

    #[test]
    fn out_of_range_access_is_rejected() {
        let mut bar_sizes = HashMap::new();
        bar_sizes.insert(0u32, 16u64);
        let instance = format!("test-oob-{}", std::process::id());
        let mgr = SharedMemoryManager::attach(&instance, "unit.map", &bar_sizes).unwrap();
        let mut buf = [0u8; 4];
        assert!(mgr.read(0, 15, &mut buf).is_err());
    }
}
