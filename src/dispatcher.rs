//! The debug-event state machine: owns the debug object and every attached
//! process, translates each `DBGUI_WAIT_STATE_CHANGE` into a typed callback,
//! and replies with the right continuation status (spec.md §4.7).
//!
//! Grounded in `original_source/debugger.c`'s `handle_state_change` (the
//! full `DbgIdle`/`DbgCreateProcessStateChange`/.../`DbgUnloadDllStateChange`
//! switch, including the initial-thread/module synthesis on process
//! creation) and `do_event_callback` (treating a missing/no-op handler as
//! silent rather than fatal). The handler-absence semantics are redesigned
//! per spec.md §9: instead of relying on Python's `AttributeError` to detect
//! "no handler for this event", [`HostHandler`] is a structural trait whose
//! methods all default to a no-op, so "the host didn't implement this" and
//! "the host implemented it as a no-op" are the same code path by
//! construction.

use crate::config::Config;
use crate::error::Result;
use crate::exception::{self, ExceptionInfo};
use crate::module::Module;
use crate::nt::{ClientId, NtDll, StateInfo};
use crate::process::Process;
use crate::thread::Thread;
use std::collections::HashMap;
use std::sync::Arc;

const DBG_EXCEPTION_HANDLED: i32 = 0x0001_0001;
const DBG_CONTINUE: i32 = 0x0001_0002;
const DBG_EXCEPTION_NOT_HANDLED: i32 = 0x8001_0001_u32 as i32;
const DBG_TERMINATE_THREAD: i32 = 0x4001_0003;
const DBG_TERMINATE_PROCESS: i32 = 0x4001_0004;

/// How the dispatcher should reply to the kernel for the event just
/// delivered (spec.md §4.7/§9). Keeping this as its own enum — rather than
/// conflating "no handler ran", "handler returned nothing", and "handler
/// chose a disposition" into a single `Option`/integer — is the
/// SPEC_FULL.md §9 redesign of the original's untyped integer return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// `DBG_EXCEPTION_HANDLED`: the debugger resolved the exception itself.
    Handled,
    /// `DBG_EXCEPTION_NOT_HANDLED`: let the target's own handlers see it.
    NotHandled,
    /// `DBG_CONTINUE`: acknowledge a non-exception event and resume.
    Continue,
    TerminateThread,
    TerminateProcess,
}

impl Continuation {
    fn to_raw(self) -> i32 {
        match self {
            Continuation::Handled => DBG_EXCEPTION_HANDLED,
            Continuation::NotHandled => DBG_EXCEPTION_NOT_HANDLED,
            Continuation::Continue => DBG_CONTINUE,
            Continuation::TerminateThread => DBG_TERMINATE_THREAD,
            Continuation::TerminateProcess => DBG_TERMINATE_PROCESS,
        }
    }
}

/// The host-implemented callback surface. Every method defaults to a no-op
/// (or, for [`HostHandler::on_exception`], to [`Continuation::NotHandled`]),
/// so a host only overrides the events it cares about — "not implemented" and
/// "implemented as a no-op" are the same default body, per spec.md §9's
/// handler-absence redesign.
///
/// Lifecycle methods return [`crate::Result<()>`] rather than `()`: a handler
/// failure does not abort the event (the dispatcher still sends its default
/// continuation) but is surfaced to the [`Dispatcher::wait_event`] caller
/// once acknowledgement has happened, per spec.md §7's propagation policy.
pub trait HostHandler {
    fn on_process_create(&mut self, process: &Process, thread: &Thread) -> Result<()> {
        let _ = (process, thread);
        Ok(())
    }
    fn on_process_exit(&mut self, process: &Process) -> Result<()> {
        let _ = process;
        Ok(())
    }
    fn on_thread_create(&mut self, process: &Process, thread: &Thread) -> Result<()> {
        let _ = (process, thread);
        Ok(())
    }
    fn on_thread_exit(&mut self, process: &Process, thread: &Thread) -> Result<()> {
        let _ = (process, thread);
        Ok(())
    }
    fn on_module_load(&mut self, process: &Process, module: &Module) -> Result<()> {
        let _ = (process, module);
        Ok(())
    }
    fn on_module_unload(&mut self, process: &Process, module: &Module) -> Result<()> {
        let _ = (process, module);
        Ok(())
    }
    fn on_breakpoint(&mut self, process: &Process, thread: &Thread) -> Result<()> {
        let _ = (process, thread);
        Ok(())
    }
    fn on_single_step(&mut self, process: &Process, thread: &Thread) -> Result<()> {
        let _ = (process, thread);
        Ok(())
    }
    fn on_exception(
        &mut self,
        process: &Process,
        thread: &Thread,
        info: &ExceptionInfo,
        first_chance: bool,
    ) -> Result<Continuation> {
        let _ = (process, thread, info, first_chance);
        Ok(Continuation::NotHandled)
    }
}

/// Owns the debug object and every attached process. The top-level entity a
/// host constructs (spec.md §4.7, §9).
pub struct Dispatcher {
    nt: Arc<NtDll>,
    debug_object: isize,
    processes: HashMap<u32, Process>,
    config: Config,
}

impl Dispatcher {
    /// Resolves the native entry points and creates a fresh debug object
    /// with default [`Config`] (spec.md §4.1/§4.7). Fails with
    /// `Error::PlatformUnsupported` off Windows or if any entry point is
    /// missing.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    #[tracing::instrument(name = "Dispatcher::with_config", skip_all)]
    pub fn with_config(config: Config) -> Result<Self> {
        let nt = Arc::new(NtDll::new()?);
        let debug_object = nt.create_debug_object(config.kill_on_close)?;
        Ok(Dispatcher {
            nt,
            debug_object,
            processes: HashMap::new(),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn eager_section_names(&self) -> bool {
        matches!(
            self.config.section_name_resolution,
            crate::config::SectionNameResolution::Eager
        )
    }

    /// Spawns `command_line` suspended, attaches the debug object to it, and
    /// resumes its initial thread (spec.md §4.1, mirroring
    /// `original_source/debugger.c`'s `spawn`). On attach failure the
    /// partially-created process is terminated rather than left orphaned and
    /// suspended.
    #[tracing::instrument(skip(self))]
    pub fn spawn(&mut self, command_line: &str) -> Result<u32> {
        let (process_handle, thread_handle, process_id, _thread_id) =
            self.nt.create_process_suspended(command_line)?;

        if let Err(err) = self.nt.debug_active_process(process_handle, self.debug_object) {
            let _ = self.nt.terminate_process(process_handle, 1);
            self.nt.close_handle(thread_handle);
            self.nt.close_handle(process_handle);
            return Err(err);
        }

        self.nt.resume_thread(thread_handle)?;
        self.nt.close_handle(thread_handle);
        self.nt.close_handle(process_handle);
        Ok(process_id)
    }

    /// Attaches to an already-running process by id (spec.md §4.1).
    pub fn attach(&mut self, process_handle: isize) -> Result<()> {
        self.nt.debug_active_process(process_handle, self.debug_object)
    }

    /// Detaches a process, leaving it running (spec.md §4.1).
    pub fn detach(&mut self, process_id: u32) -> Result<()> {
        if let Some(process) = self.processes.remove(&process_id) {
            self.nt.remove_process_debug(process.handle(), self.debug_object)?;
        }
        Ok(())
    }

    pub fn process(&self, process_id: u32) -> Option<&Process> {
        self.processes.get(&process_id)
    }

    pub fn processes(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }

    /// Blocks for up to `timeout_ms` (`None` = infinite) for the next debug
    /// event, dispatches it to `handler`, and replies to the kernel exactly
    /// once. Returns `Ok(false)` on a plain timeout with nothing to
    /// dispatch, `Ok(true)` otherwise (spec.md §4.7's event-loop contract).
    ///
    /// A handler failure does not skip the continuation reply: the dispatcher
    /// still acknowledges the event with its default disposition for that
    /// kind, and only then returns the handler's error to this caller
    /// (spec.md §7's propagation policy).
    #[tracing::instrument(skip(self, handler))]
    pub fn wait_event<H: HostHandler>(&mut self, timeout_ms: Option<u32>, handler: &mut H) -> Result<bool> {
        let Some(change) = self.nt.wait_state_change(self.debug_object, timeout_ms)? else {
            return Ok(false);
        };

        let client_id = change.client_id;
        let (reply_status, handler_result) = self.dispatch(client_id, change.info, handler);
        self.nt.debug_continue(self.debug_object, client_id, reply_status)?;
        handler_result?;
        Ok(true)
    }

    /// [`Dispatcher::wait_event`] using [`Config::default_wait_timeout_ms`].
    pub fn wait_event_default<H: HostHandler>(&mut self, handler: &mut H) -> Result<bool> {
        self.wait_event(self.config.default_wait_timeout_ms, handler)
    }

    /// Dispatches one state change. Returns the raw continuation status to
    /// reply with (always the kind's fixed default except for `Exception`,
    /// where the handler chooses) paired with whatever the handler callback(s)
    /// returned, so the caller can acknowledge unconditionally and only then
    /// propagate a handler failure.
    fn dispatch<H: HostHandler>(&mut self, client_id: ClientId, info: StateInfo, handler: &mut H) -> (i32, Result<()>) {
        match info {
            StateInfo::Idle | StateInfo::ReplyPending => (DBG_CONTINUE, Ok(())),

            StateInfo::CreateProcess(create) => {
                let process_id = client_id.process_id;
                let mut process = Process::new(
                    Arc::clone(&self.nt),
                    process_id,
                    create.process_handle,
                    create.base_of_image,
                );
                // CreateProcess quirk (spec.md §4.7): the kernel reports the
                // initial thread's start address as zero in this path. Patch
                // it from ThreadQuerySetWin32StartAddress before the Thread
                // is ever observable, rather than leaving the lie in place.
                let start_address = self
                    .nt
                    .query_win32_start_address(create.thread_handle)
                    .unwrap_or(create.initial_thread_start_address);
                let thread = Thread::new(
                    Arc::clone(&self.nt),
                    process_id,
                    client_id.thread_id,
                    create.thread_handle,
                    start_address,
                );
                let module = Module::new(
                    Arc::clone(&self.nt),
                    process_id,
                    create.process_handle,
                    create.base_of_image,
                    self.eager_section_names(),
                );
                process.add_module(module);
                process.add_thread(thread);
                self.processes.insert(process_id, process);

                // spec.md §4.7: the kernel folds the initial module load and
                // initial thread creation into this one event, so the
                // dispatcher synthesizes the `on_module_load`/`on_thread_create`
                // callbacks a host would otherwise expect as separate events,
                // in the same order the kernel would have delivered them.
                let process_ref = self.processes.get(&process_id).expect("just inserted");
                let thread_ref = process_ref.thread(client_id.thread_id).expect("just inserted");
                let mut result = handler.on_process_create(process_ref, thread_ref);
                if let Some(module_ref) = process_ref.module(create.base_of_image) {
                    result = result.and(handler.on_module_load(process_ref, module_ref));
                }
                result = result.and(handler.on_thread_create(process_ref, thread_ref));
                (DBG_CONTINUE, result)
            }

            StateInfo::ExitProcess(exit) => {
                let result = if let Some(process) = self.processes.get_mut(&client_id.process_id) {
                    process.set_exit_status(exit.exit_status);
                    handler.on_process_exit(process)
                } else {
                    tracing::warn!(process_id = client_id.process_id, "ExitProcess for unknown process");
                    Ok(())
                };
                // Only drop the process once the callback has actually
                // observed the exit; a failed callback leaves it tracked so
                // a host can retry inspecting it instead of losing it.
                if result.is_ok() {
                    self.processes.remove(&client_id.process_id);
                }
                (DBG_CONTINUE, result)
            }

            StateInfo::CreateThread(create) => {
                let result = if let Some(process) = self.processes.get_mut(&client_id.process_id) {
                    let thread = Thread::new(
                        Arc::clone(&self.nt),
                        client_id.process_id,
                        client_id.thread_id,
                        create.handle,
                        create.start_address,
                    );
                    process.add_thread(thread);
                    let thread_ref = process.thread(client_id.thread_id).expect("just inserted");
                    handler.on_thread_create(process, thread_ref)
                } else {
                    tracing::warn!(process_id = client_id.process_id, "CreateThread for unknown process");
                    Ok(())
                };
                (DBG_CONTINUE, result)
            }

            StateInfo::ExitThread(exit) => {
                let result = if let Some(process) = self.processes.get_mut(&client_id.process_id) {
                    // Distinguished `Option`, not an error: the thread may
                    // already have been reaped, or never observed
                    // (spec.md §9, Open Question 2).
                    match process.remove_thread(client_id.thread_id) {
                        Some(mut removed) => {
                            removed.set_exit_status(exit.exit_status);
                            handler.on_thread_exit(process, &removed)
                        }
                        None => {
                            tracing::warn!(
                                process_id = client_id.process_id,
                                thread_id = client_id.thread_id,
                                "ExitThread for untracked thread"
                            );
                            Ok(())
                        }
                    }
                } else {
                    tracing::warn!(process_id = client_id.process_id, "ExitThread for unknown process");
                    Ok(())
                };
                (DBG_CONTINUE, result)
            }

            StateInfo::LoadDll(load) => {
                let eager = self.eager_section_names();
                let result = if let Some(process) = self.processes.get_mut(&client_id.process_id) {
                    let module = Module::new(
                        Arc::clone(&self.nt),
                        client_id.process_id,
                        process.handle(),
                        load.base_of_dll,
                        eager,
                    );
                    process.add_module(module);
                    let module_ref = process.module(load.base_of_dll).expect("just inserted");
                    handler.on_module_load(process, module_ref)
                } else {
                    tracing::warn!(process_id = client_id.process_id, "LoadDll for unknown process");
                    Ok(())
                };
                (DBG_CONTINUE, result)
            }

            StateInfo::UnloadDll(unload) => {
                let result = if let Some(process) = self.processes.get_mut(&client_id.process_id) {
                    match process.remove_module(unload.base_address) {
                        Some(module) => handler.on_module_unload(process, &module),
                        None => {
                            tracing::warn!(
                                process_id = client_id.process_id,
                                base_address = format_args!("{:#x}", unload.base_address),
                                "UnloadDll for untracked module"
                            );
                            Ok(())
                        }
                    }
                } else {
                    tracing::warn!(process_id = client_id.process_id, "UnloadDll for unknown process");
                    Ok(())
                };
                (DBG_CONTINUE, result)
            }

            StateInfo::Breakpoint => {
                let result = match self.processes.get(&client_id.process_id) {
                    Some(process) => match process.thread(client_id.thread_id) {
                        Some(thread) => handler.on_breakpoint(process, thread),
                        None => Ok(()),
                    },
                    None => Ok(()),
                };
                (DBG_EXCEPTION_HANDLED, result)
            }

            StateInfo::SingleStep => {
                let result = match self.processes.get(&client_id.process_id) {
                    Some(process) => match process.thread(client_id.thread_id) {
                        Some(thread) => handler.on_single_step(process, thread),
                        None => Ok(()),
                    },
                    None => Ok(()),
                };
                (DBG_CONTINUE, result)
            }

            StateInfo::Exception { record, first_chance } => {
                let info = exception::translate(&record);
                match self.processes.get(&client_id.process_id) {
                    Some(process) => match process.thread(client_id.thread_id) {
                        Some(thread) => match handler.on_exception(process, thread, &info, first_chance) {
                            Ok(continuation) => (continuation.to_raw(), Ok(())),
                            Err(err) => (Continuation::NotHandled.to_raw(), Err(err)),
                        },
                        None => {
                            tracing::warn!(
                                process_id = client_id.process_id,
                                thread_id = client_id.thread_id,
                                "exception on untracked thread"
                            );
                            (Continuation::NotHandled.to_raw(), Ok(()))
                        }
                    },
                    None => {
                        tracing::warn!(process_id = client_id.process_id, "exception on unknown process");
                        (Continuation::NotHandled.to_raw(), Ok(()))
                    }
                }
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.nt.close_handle(self.debug_object);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::nt::{CreateProcessInfo, ExitInfo, UnloadDllInfo};

    #[test]
    fn continuation_maps_to_expected_dbg_constants() {
        assert_eq!(Continuation::Handled.to_raw(), 0x0001_0001);
        assert_eq!(Continuation::Continue.to_raw(), 0x0001_0002);
        assert_eq!(Continuation::NotHandled.to_raw(), 0x8001_0001_u32 as i32);
        assert_eq!(Continuation::TerminateThread.to_raw(), 0x4001_0003);
        assert_eq!(Continuation::TerminateProcess.to_raw(), 0x4001_0004);
    }

    #[test]
    fn host_handler_is_object_safe_enough_for_a_no_override_impl() {
        struct Silent;
        impl HostHandler for Silent {}
        // Compiling this impl is the assertion: every method must have a
        // usable default, or this fails to build.
        let _handler = Silent;
    }

    fn test_dispatcher() -> Dispatcher {
        Dispatcher {
            nt: Arc::new(NtDll::for_tests()),
            debug_object: 1,
            processes: HashMap::new(),
            config: Config::default(),
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        calls: Vec<String>,
        fail_process_exit: bool,
    }

    impl HostHandler for RecordingHandler {
        fn on_process_create(&mut self, process: &Process, thread: &Thread) -> Result<()> {
            self.calls.push(format!("process_create({},{})", process.id(), thread.id()));
            Ok(())
        }
        fn on_module_load(&mut self, process: &Process, module: &Module) -> Result<()> {
            self.calls
                .push(format!("module_load({},{:#x})", process.id(), module.base_address()));
            Ok(())
        }
        fn on_thread_create(&mut self, process: &Process, thread: &Thread) -> Result<()> {
            self.calls.push(format!("thread_create({},{})", process.id(), thread.id()));
            Ok(())
        }
        fn on_process_exit(&mut self, process: &Process) -> Result<()> {
            self.calls.push(format!("process_exit({})", process.id()));
            if self.fail_process_exit {
                Err(Error::engine("host failed to handle process exit"))
            } else {
                Ok(())
            }
        }
        fn on_thread_exit(&mut self, process: &Process, thread: &Thread) -> Result<()> {
            self.calls
                .push(format!("thread_exit({},{},{:?})", process.id(), thread.id(), thread.exit_status()));
            Ok(())
        }
        fn on_module_unload(&mut self, process: &Process, module: &Module) -> Result<()> {
            self.calls
                .push(format!("module_unload({},{:#x})", process.id(), module.base_address()));
            Ok(())
        }
    }

    #[test]
    fn create_process_synthesizes_module_load_then_thread_create() {
        let mut dispatcher = test_dispatcher();
        let mut handler = RecordingHandler::default();
        let client_id = ClientId { process_id: 100, thread_id: 1 };
        let create = CreateProcessInfo {
            process_handle: 11,
            thread_handle: 22,
            base_of_image: 0x0040_0000,
            initial_thread_start_address: 0x7700_0000,
        };

        let (status, result) = dispatcher.dispatch(client_id, StateInfo::CreateProcess(create), &mut handler);

        assert_eq!(status, DBG_CONTINUE);
        assert!(result.is_ok());
        assert_eq!(
            handler.calls,
            vec![
                "process_create(100,1)".to_string(),
                format!("module_load(100,{:#x})", 0x0040_0000u32),
                "thread_create(100,1)".to_string(),
            ]
        );
        let process = dispatcher.process(100).expect("process tracked");
        assert!(process.thread(1).is_some());
        assert!(process.module(0x0040_0000).is_some());
    }

    #[test]
    fn exit_process_keeps_process_tracked_when_handler_fails() {
        let mut dispatcher = test_dispatcher();
        let process = Process::new(Arc::new(NtDll::for_tests()), 200, 33, 0x0040_0000);
        dispatcher.processes.insert(200, process);
        let mut handler = RecordingHandler { fail_process_exit: true, ..Default::default() };
        let client_id = ClientId { process_id: 200, thread_id: 0 };

        let (status, result) =
            dispatcher.dispatch(client_id, StateInfo::ExitProcess(ExitInfo { exit_status: 1 }), &mut handler);

        assert_eq!(status, DBG_CONTINUE);
        assert!(result.is_err());
        assert!(dispatcher.process(200).is_some(), "a failed callback must not lose the process");
    }

    #[test]
    fn exit_process_removes_process_when_handler_succeeds() {
        let mut dispatcher = test_dispatcher();
        let process = Process::new(Arc::new(NtDll::for_tests()), 201, 34, 0x0040_0000);
        dispatcher.processes.insert(201, process);
        let mut handler = RecordingHandler::default();
        let client_id = ClientId { process_id: 201, thread_id: 0 };

        let (_, result) =
            dispatcher.dispatch(client_id, StateInfo::ExitProcess(ExitInfo { exit_status: 0 }), &mut handler);

        assert!(result.is_ok());
        assert!(dispatcher.process(201).is_none());
    }

    #[test]
    fn exit_thread_passes_the_removed_thread_with_exit_status_set() {
        let mut dispatcher = test_dispatcher();
        let nt = Arc::new(NtDll::for_tests());
        let mut process = Process::new(Arc::clone(&nt), 300, 55, 0x0040_0000);
        process.add_thread(Thread::new(Arc::clone(&nt), 300, 7, 66, 0x7700_1000));
        dispatcher.processes.insert(300, process);
        let mut handler = RecordingHandler::default();
        let client_id = ClientId { process_id: 300, thread_id: 7 };

        let (status, result) =
            dispatcher.dispatch(client_id, StateInfo::ExitThread(ExitInfo { exit_status: 42 }), &mut handler);

        assert_eq!(status, DBG_CONTINUE);
        assert!(result.is_ok());
        assert_eq!(handler.calls, vec!["thread_exit(300,7,Some(42))".to_string()]);
        assert!(dispatcher.process(300).unwrap().thread(7).is_none());
    }

    #[test]
    fn unload_dll_passes_the_removed_module() {
        let mut dispatcher = test_dispatcher();
        let nt = Arc::new(NtDll::for_tests());
        let mut process = Process::new(Arc::clone(&nt), 400, 77, 0x0040_0000);
        process.add_module(Module::new(Arc::clone(&nt), 400, 77, 0x1000_0000, false));
        dispatcher.processes.insert(400, process);
        let mut handler = RecordingHandler::default();
        let client_id = ClientId { process_id: 400, thread_id: 0 };

        let (status, result) = dispatcher.dispatch(
            client_id,
            StateInfo::UnloadDll(UnloadDllInfo { base_address: 0x1000_0000 }),
            &mut handler,
        );

        assert_eq!(status, DBG_CONTINUE);
        assert!(result.is_ok());
        assert_eq!(handler.calls, vec![format!("module_unload(400,{:#x})", 0x1000_0000u32)]);
        assert!(dispatcher.process(400).unwrap().module(0x1000_0000).is_none());
    }
}
