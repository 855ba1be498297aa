pub mod phase1 {
    use std::cell::Cell;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::{Arc, Condvar, Mutex};
    use std::thread::{self, JoinHandle};

    use log::{debug, error, trace};

    use phase2_core::error::error::{SysError, SysResult};
    use phase2_core::proc::proc::{
        HIGHEST_PRIORITY, LOWEST_PRIORITY, MAX_NAME, MAX_PROC, MAX_SEMS, MIN_STACK, Pid, ProcEntry, ProcInfo,
        ProcState, ProcessExit, ProcessLayer, SemId, Tag,
    };

    thread_local! {
        static CURRENT: Cell<Option<Pid>> = const { Cell::new(None) };
    }

    struct Pcb {
        name: String,
        priority: u32,
        tag: Tag,
        parent: Option<Pid>,
        children: Vec<Pid>,
        state: ProcState,
        status: i32,
    }

    struct SemState {
        count: u32,
        waiters: usize,
        /// V operations handed to a waiter that has not run yet.
        grants: usize,
        freed: bool,
    }

    struct Sem {
        name: String,
        state: Mutex<SemState>,
        wake: Condvar,
    }

    struct Table {
        procs: Vec<Option<Pcb>>,
        sems: Vec<Option<Arc<Sem>>>,
    }

    struct Inner {
        table: Mutex<Table>,
        changed: Condvar,
    }

    /// Hosted process layer. Each process is an OS thread; the table slot
    /// is the process id.
    #[derive(Clone)]
    pub struct Phase1 {
        inner: Arc<Inner>,
    }

    impl Phase1 {
        pub fn new() -> Phase1 {
            Phase1 {
                inner: Arc::new(Inner {
                    table: Mutex::new(Table {
                        procs: (0..MAX_PROC).map(|_| None).collect(),
                        sems: (0..MAX_SEMS).map(|_| None).collect(),
                    }),
                    changed: Condvar::new(),
                }),
            }
        }

        /// Run `entry` as a parentless kernel process and wait for it on the
        /// calling (non-process) thread.
        pub fn boot<F>(&self, name: &str, entry: F) -> SysResult<i32>
        where
            F: FnOnce() -> i32 + Send + 'static,
        {
            let (_, handle) = self.create(name, Box::new(entry), MIN_STACK, HIGHEST_PRIORITY, Tag::Kernel, None)?;
            handle.join().map_err(|_| SysError::InvalidPid)
        }

        pub fn live_processes(&self) -> usize {
            let table = self.inner.table.lock().unwrap();
            table.procs.iter().filter(|slot| slot.is_some()).count()
        }

        pub fn live_semaphores(&self) -> usize {
            let table = self.inner.table.lock().unwrap();
            table.sems.iter().filter(|slot| slot.is_some()).count()
        }

        fn create(
            &self,
            name: &str,
            entry: ProcEntry,
            stack_size: usize,
            priority: u32,
            tag: Tag,
            parent: Option<Pid>,
        ) -> SysResult<(Pid, JoinHandle<i32>)> {
            if name.len() > MAX_NAME {
                return Err(SysError::NameTooLong);
            }
            if !(HIGHEST_PRIORITY..=LOWEST_PRIORITY).contains(&priority) {
                return Err(SysError::InvalidPriority);
            }
            if stack_size < MIN_STACK {
                return Err(SysError::InvalidStack);
            }

            let mut table = self.inner.table.lock().unwrap();
            if table.procs.iter().flatten().any(|pcb| pcb.name == name) {
                return Err(SysError::DuplicateName);
            }
            let pid = table
                .procs
                .iter()
                .position(|slot| slot.is_none())
                .ok_or(SysError::TooManyProcesses)?;

            let inner = Arc::clone(&self.inner);
            let spawned = thread::Builder::new()
                .name(name.to_string())
                .stack_size(stack_size)
                .spawn(move || run_process(inner, pid, entry));
            let handle = match spawned {
                Ok(handle) => handle,
                Err(err) => {
                    error!("phase1: could not start {name}: {err}");
                    return Err(SysError::TooManyProcesses);
                }
            };

            table.procs[pid] = Some(Pcb {
                name: name.to_string(),
                priority,
                tag,
                parent,
                children: Vec::new(),
                state: ProcState::Running,
                status: 0,
            });
            if let Some(Some(pcb)) = parent.map(|parent| &mut table.procs[parent]) {
                pcb.children.push(pid);
            }
            debug!("phase1: forked {name} as {pid} (parent {parent:?}, {tag:?})");
            Ok((pid, handle))
        }

        fn set_state(&self, pid: Pid, state: ProcState) {
            let mut table = self.inner.table.lock().unwrap();
            if let Some(pcb) = table.procs[pid].as_mut() {
                pcb.state = state;
            }
        }

        fn sem(&self, sid: SemId) -> SysResult<Arc<Sem>> {
            let table = self.inner.table.lock().unwrap();
            table.sems.get(sid).and_then(|slot| slot.clone()).ok_or(SysError::InvalidSid)
        }
    }

    impl Default for Phase1 {
        fn default() -> Self {
            Phase1::new()
        }
    }

    fn run_process(inner: Arc<Inner>, pid: Pid, entry: ProcEntry) -> i32 {
        CURRENT.with(|current| current.set(Some(pid)));
        // the table entry is filled in under the lock the forker still holds
        drop(inner.table.lock().unwrap());

        let status = match panic::catch_unwind(AssertUnwindSafe(entry)) {
            Ok(status) => status,
            Err(payload) => ProcessExit::from_payload(payload.as_ref()).unwrap_or_else(|| {
                error!("phase1: process {pid} panicked");
                -1
            }),
        };
        exit(&inner, pid, status);
        status
    }

    fn exit(inner: &Inner, pid: Pid, status: i32) {
        let mut table = inner.table.lock().unwrap();
        let Some(pcb) = table.procs[pid].as_mut() else {
            return;
        };
        pcb.state = ProcState::Quit;
        pcb.status = status;
        let children = std::mem::take(&mut pcb.children);
        let parent = pcb.parent;

        for child in children {
            let reap = match table.procs[child].as_mut() {
                Some(orphan) => {
                    orphan.parent = None;
                    orphan.state == ProcState::Quit
                }
                None => false,
            };
            if reap {
                table.procs[child] = None;
            }
        }
        if parent.is_none() {
            table.procs[pid] = None;
        }
        trace!("phase1: process {pid} quit with {status}");
        inner.changed.notify_all();
    }

    impl ProcessLayer for Phase1 {
        fn fork(&self, name: &str, entry: ProcEntry, stack_size: usize, priority: u32, tag: Tag) -> SysResult<Pid> {
            let parent = self.current_pid();
            self.create(name, entry, stack_size, priority, tag, parent)
                .map(|(pid, _)| pid)
        }

        fn join(&self, tag: Tag) -> SysResult<(Pid, i32)> {
            let me = self.current_pid().ok_or(SysError::InvalidPid)?;
            let mut table = self.inner.table.lock().unwrap();
            loop {
                let (tagged, quit) = {
                    let procs = &table.procs;
                    let children = procs[me].as_ref().map(|pcb| pcb.children.as_slice()).unwrap_or(&[]);
                    let tagged: Vec<Pid> = children
                        .iter()
                        .copied()
                        .filter(|child| procs[*child].as_ref().is_some_and(|pcb| pcb.tag == tag))
                        .collect();
                    let quit = tagged
                        .iter()
                        .copied()
                        .find(|child| procs[*child].as_ref().is_some_and(|pcb| pcb.state == ProcState::Quit));
                    (tagged.len(), quit)
                };
                if tagged == 0 {
                    return Err(SysError::NoChildren);
                }

                if let Some(child) = quit {
                    let status = table.procs[child].take().map(|pcb| pcb.status).unwrap_or_default();
                    if let Some(pcb) = table.procs[me].as_mut() {
                        pcb.children.retain(|pid| *pid != child);
                        pcb.state = ProcState::Running;
                    }
                    return Ok((child, status));
                }
                if let Some(pcb) = table.procs[me].as_mut() {
                    pcb.state = ProcState::Blocked;
                }
                table = self.inner.changed.wait(table).unwrap();
            }
        }

        fn quit(&self, status: i32) -> ! {
            panic::resume_unwind(Box::new(ProcessExit(status)))
        }

        fn sem_create(&self, name: &str, value: u32) -> SysResult<SemId> {
            if name.len() > MAX_NAME {
                return Err(SysError::NameTooLong);
            }
            let mut table = self.inner.table.lock().unwrap();
            if table.sems.iter().flatten().any(|sem| sem.name == name) {
                return Err(SysError::DuplicateName);
            }
            let sid = table
                .sems
                .iter()
                .position(|slot| slot.is_none())
                .ok_or(SysError::TooManySemaphores)?;
            table.sems[sid] = Some(Arc::new(Sem {
                name: name.to_string(),
                state: Mutex::new(SemState {
                    count: value,
                    waiters: 0,
                    grants: 0,
                    freed: false,
                }),
                wake: Condvar::new(),
            }));
            Ok(sid)
        }

        fn p(&self, sid: SemId) -> SysResult<()> {
            let sem = self.sem(sid)?;
            {
                let mut state = sem.state.lock().unwrap();
                if state.count > 0 {
                    state.count -= 1;
                    return Ok(());
                }
            }

            let me = self.current_pid();
            if let Some(pid) = me {
                self.set_state(pid, ProcState::Blocked);
            }
            let result = {
                let mut state = sem.state.lock().unwrap();
                state.waiters += 1;
                loop {
                    if state.grants > 0 {
                        state.grants -= 1;
                        state.waiters -= 1;
                        break Ok(());
                    }
                    if state.count > 0 {
                        state.count -= 1;
                        state.waiters -= 1;
                        break Ok(());
                    }
                    if state.freed {
                        state.waiters -= 1;
                        break Err(SysError::WaitAborted);
                    }
                    state = sem.wake.wait(state).unwrap();
                }
            };
            if let Some(pid) = me {
                self.set_state(pid, ProcState::Running);
            }
            result
        }

        fn v(&self, sid: SemId) -> SysResult<()> {
            let sem = self.sem(sid)?;
            let mut state = sem.state.lock().unwrap();
            if state.waiters > state.grants {
                state.grants += 1;
                sem.wake.notify_one();
            } else {
                state.count = state.count.saturating_add(1);
            }
            Ok(())
        }

        fn sem_free(&self, sid: SemId) -> SysResult<()> {
            let mut table = self.inner.table.lock().unwrap();
            let sem = table.sems.get(sid).and_then(|slot| slot.clone()).ok_or(SysError::InvalidSid)?;
            let mut state = sem.state.lock().unwrap();
            if state.waiters > state.grants {
                return Err(SysError::BlockedProcesses);
            }
            state.freed = true;
            drop(state);
            table.sems[sid] = None;
            Ok(())
        }

        fn sem_name(&self, sid: SemId) -> SysResult<String> {
            self.sem(sid).map(|sem| sem.name.clone())
        }

        fn proc_info(&self, pid: Pid) -> SysResult<ProcInfo> {
            let table = self.inner.table.lock().unwrap();
            let pcb = table.procs.get(pid).and_then(|slot| slot.as_ref()).ok_or(SysError::InvalidPid)?;
            Ok(ProcInfo {
                name: pcb.name.clone(),
                state: pcb.state,
                priority: pcb.priority,
                tag: pcb.tag,
                parent: pcb.parent,
                children: pcb.children.clone(),
            })
        }

        fn current_pid(&self) -> Option<Pid> {
            CURRENT.with(|current| current.get())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::sync::mpsc;

        #[test]
        fn fork_validates_before_creating() {
            let procs = Phase1::new();
            let entry = || -> ProcEntry { Box::new(|| 0) };
            let long = "x".repeat(MAX_NAME + 1);
            assert_eq!(procs.fork(&long, entry(), MIN_STACK, 3, Tag::User), Err(SysError::NameTooLong));
            assert_eq!(procs.fork("p", entry(), MIN_STACK, 0, Tag::User), Err(SysError::InvalidPriority));
            assert_eq!(procs.fork("p", entry(), MIN_STACK, 6, Tag::User), Err(SysError::InvalidPriority));
            assert_eq!(procs.fork("p", entry(), MIN_STACK - 1, 3, Tag::User), Err(SysError::InvalidStack));
            assert_eq!(procs.live_processes(), 0);
        }

        #[test]
        fn boot_returns_the_exit_status() {
            let procs = Phase1::new();
            assert_eq!(procs.boot("returns", || 7), Ok(7));

            let quitter = procs.clone();
            assert_eq!(procs.boot("quits", move || quitter.quit(42)), Ok(42));
            assert_eq!(procs.live_processes(), 0);
        }

        #[test]
        fn join_reaps_children_by_tag() {
            let procs = Phase1::new();
            let inner = procs.clone();
            let status = procs.boot("parent", move || {
                assert_eq!(inner.join(Tag::User), Err(SysError::NoChildren));
                let kernel = inner.fork("k", Box::new(|| 1), MIN_STACK, 2, Tag::Kernel).unwrap();
                let user = inner.fork("u", Box::new(|| 2), MIN_STACK, 4, Tag::User).unwrap();
                assert_eq!(inner.join(Tag::User), Ok((user, 2)));
                assert_eq!(inner.join(Tag::User), Err(SysError::NoChildren));
                assert_eq!(inner.join(Tag::Kernel), Ok((kernel, 1)));
                0
            });
            assert_eq!(status, Ok(0));
            assert_eq!(procs.live_processes(), 0);
        }

        #[test]
        fn v_before_free_still_reaches_the_waiter() {
            let procs = Phase1::new();
            let sid = procs.sem_create("handoff", 0).unwrap();
            assert_eq!(procs.sem_create("handoff", 0), Err(SysError::DuplicateName));

            let (tx, rx) = mpsc::channel();
            let waiter = procs.clone();
            let handle = thread::spawn(move || {
                tx.send(()).unwrap();
                waiter.p(sid)
            });
            rx.recv().unwrap();
            while procs.sem(sid).unwrap().state.lock().unwrap().waiters == 0 {
                thread::yield_now();
            }
            assert_eq!(procs.sem_free(sid), Err(SysError::BlockedProcesses));
            procs.v(sid).unwrap();
            assert_eq!(procs.sem_free(sid), Ok(()));
            assert_eq!(handle.join().unwrap(), Ok(()));
            assert_eq!(procs.sem_name(sid), Err(SysError::InvalidSid));
            assert_eq!(procs.live_semaphores(), 0);
        }

        #[test]
        fn counting_semaphore_does_not_block_with_credit() {
            let procs = Phase1::new();
            let sid = procs.sem_create("credit", 2).unwrap();
            procs.p(sid).unwrap();
            procs.p(sid).unwrap();
            procs.v(sid).unwrap();
            procs.p(sid).unwrap();
            assert_eq!(procs.sem_name(sid), Ok("credit".to_string()));
            procs.sem_free(sid).unwrap();
        }
    }
}
