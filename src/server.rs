//! The reactor: owns the listening socket and the epoll instance, accepts connections,
//! and dispatches readiness events to the worker pool. Grounded in the original's
//! `WebServer::Start`/`InitSocket_`/`DealListen_`/`OnRead_`/`OnProcess`/`OnWrite_`, with
//! the epoll instance shared (via `Arc<Multiplexer>`) between the reactor thread — the
//! only thread that ever calls `wait` — and the worker threads, which call `modify`/`del`
//! directly to rearm or retire a one-shot registration once they finish a step. Kernel
//! epoll control operations are thread-safe across fds, so no additional locking is
//! needed around the shared `Multiplexer`.

use std::collections::HashMap;
use std::net::{TcpListener as StdTcpListener, SocketAddr};
use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ServerConfig;
use crate::connection::{Connection, ProcessOutcome, ReadOutcome, State, WriteOutcome};
use crate::error::{ConnError, EngineError};
use crate::mux::{Event, Interest, Multiplexer, Trigger, TriggerMode};
use crate::pool::WorkerPool;
use crate::timer::TimerHeap;

const SERVER_BUSY: &[u8] = b"Server busy!";

enum Completion {
    Rearm { fd: RawFd, interest: Interest },
    Close { fd: RawFd },
}

/// The running engine: listener, epoll instance, worker pool, and the connection/timer
/// bookkeeping the reactor loop owns exclusively.
pub struct Server {
    listener: StdTcpListener,
    mux: Arc<Multiplexer>,
    pool: WorkerPool,
    doc_root: Arc<PathBuf>,
    trigger_mode: TriggerMode,
    timeout_ms: u64,
    max_connections: usize,
    conn_count: Arc<AtomicUsize>,
}

impl Server {
    /// Builds the listening socket with the original's exact socket-option sequence
    /// (`SO_LINGER`, `SO_REUSEADDR`, non-blocking) and registers it with the shared
    /// multiplexer.
    pub fn bind(config: &ServerConfig) -> Result<Self, EngineError> {
        let listener = create_listen_socket(config.port, config.opt_linger)
            .map_err(EngineError::ListenInitFailure)?;
        let mux = Arc::new(Multiplexer::new().map_err(EngineError::Multiplexer)?);
        let trigger_mode = TriggerMode::from_flag(config.trigger_mode);
        mux.add(listener.as_raw_fd(), Interest::READABLE, trigger_mode.listen, false)
            .map_err(EngineError::ListenInitFailure)?;

        log::info!(
            "listening on port {}, listen trigger {:?}, conn trigger {:?}",
            config.port,
            trigger_mode.listen,
            trigger_mode.connection
        );

        Ok(Server {
            listener,
            mux,
            pool: WorkerPool::new(config.thread_count),
            doc_root: Arc::new(config.doc_root.clone()),
            trigger_mode,
            timeout_ms: config.timeout_ms,
            max_connections: config.max_connections,
            conn_count: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Runs the event loop until the process receives a termination signal or the
    /// listening socket itself errors out.
    pub fn run(&mut self) -> Result<(), EngineError> {
        let listen_fd = self.listener.as_raw_fd();
        let mut connections: HashMap<RawFd, Arc<Mutex<Connection>>> = HashMap::new();
        let mut timers = TimerHeap::default();
        let expired: Arc<Mutex<Vec<RawFd>>> = Arc::new(Mutex::new(Vec::new()));
        let (completions_tx, completions_rx) = crossbeam_channel::unbounded::<Completion>();
        let mut events: Vec<Event> = Vec::with_capacity(1024);

        loop {
            let timeout = if self.timeout_ms > 0 {
                let ms = timers.next_tick_ms();
                for fd in expired.lock().unwrap().drain(..).collect::<Vec<_>>() {
                    self.dispatch_close(fd, &mut connections, &mut timers);
                }
                if ms < 0 {
                    None
                } else {
                    Some(Duration::from_millis(ms as u64))
                }
            } else {
                None
            };

            self.mux.wait(&mut events, timeout).map_err(EngineError::Multiplexer)?;

            while let Ok(completion) = completions_rx.try_recv() {
                self.apply_completion(completion, &mut connections, &mut timers);
            }

            for event in &events {
                let fd = event.token() as RawFd;

                if fd == listen_fd {
                    self.accept_loop(&mut connections, &mut timers, &expired)
                        .map_err(EngineError::Multiplexer)?;
                    continue;
                }

                if event.is_hangup_or_error() {
                    self.dispatch_close(fd, &mut connections, &mut timers);
                    continue;
                }

                let Some(conn) = connections.get(&fd).cloned() else {
                    continue;
                };

                if self.timeout_ms > 0 {
                    timers.adjust(fd, self.timeout_ms);
                }

                let readable = event.is_readable();
                let writable = event.is_writable();
                let doc_root = self.doc_root.clone();
                let mux = self.mux.clone();
                let trigger = self.trigger_mode.connection;
                let completions = completions_tx.clone();

                self.pool.submit(move || {
                    let outcome = handle_event(&conn, &doc_root, trigger, readable, writable);
                    let completion = match outcome {
                        EventOutcome::Close => Completion::Close { fd },
                        EventOutcome::Rearm(interest) => Completion::Rearm { fd, interest },
                    };
                    if let Completion::Rearm { fd, interest } = &completion {
                        let _ = mux.modify(*fd, *interest, trigger, true);
                    }
                    let _ = completions.send(completion);
                });
            }
        }
    }

    fn accept_loop(
        &self,
        connections: &mut HashMap<RawFd, Arc<Mutex<Connection>>>,
        timers: &mut TimerHeap,
        expired: &Arc<Mutex<Vec<RawFd>>>,
    ) -> std::io::Result<()> {
        loop {
            let (stream, addr) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if crate::buffer::is_recoverable(&e) => return Ok(()),
                Err(e) => return Err(e),
            };

            if self.conn_count.load(Ordering::Relaxed) >= self.max_connections {
                reject_busy(stream.as_raw_fd());
                log::warn!("{} ({}); rejecting {addr}", ConnError::ResourceExhausted, self.max_connections);
                if self.trigger_mode.listen == Trigger::Level {
                    return Ok(());
                }
                continue;
            }

            let fd = stream.as_raw_fd();
            let conn = match Connection::new(stream, addr) {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("failed to prepare accepted connection from {addr}: {e}");
                    if self.trigger_mode.listen == Trigger::Level {
                        return Ok(());
                    }
                    continue;
                }
            };

            if let Err(e) = self.mux.add(fd, Interest::READABLE, self.trigger_mode.connection, true) {
                log::warn!("failed to register accepted fd {fd}: {e}");
                if self.trigger_mode.listen == Trigger::Level {
                    return Ok(());
                }
                continue;
            }

            if self.timeout_ms > 0 {
                let expired = expired.clone();
                timers.add(
                    fd,
                    self.timeout_ms,
                    Box::new(move |fd| expired.lock().unwrap().push(fd)),
                );
            }
            self.conn_count.fetch_add(1, Ordering::Relaxed);
            connections.insert(fd, Arc::new(Mutex::new(conn)));
            log::info!("client[{fd}]({addr}) in, user_count={}", self.conn_count.load(Ordering::Relaxed));

            if self.trigger_mode.listen == Trigger::Level {
                return Ok(());
            }
        }
    }

    fn dispatch_close(
        &self,
        fd: RawFd,
        connections: &mut HashMap<RawFd, Arc<Mutex<Connection>>>,
        timers: &mut TimerHeap,
    ) {
        let _ = self.mux.del(fd);
        if connections.remove(&fd).is_some() {
            timers.remove(fd, false);
            let remaining = self.conn_count.fetch_sub(1, Ordering::Relaxed) - 1;
            log::info!("client[{fd}] closed, user_count={remaining}");
        }
    }

    fn apply_completion(
        &self,
        completion: Completion,
        connections: &mut HashMap<RawFd, Arc<Mutex<Connection>>>,
        timers: &mut TimerHeap,
    ) {
        match completion {
            Completion::Close { fd } => self.dispatch_close(fd, connections, timers),
            Completion::Rearm { .. } => {
                // Interest already re-armed on the worker thread before sending this
                // completion; nothing left for the reactor to do.
            }
        }
    }
}

enum EventOutcome {
    Rearm(Interest),
    Close,
}

fn handle_event(
    conn: &Arc<Mutex<Connection>>,
    doc_root: &PathBuf,
    trigger: Trigger,
    readable: bool,
    writable: bool,
) -> EventOutcome {
    let mut c = conn.lock().unwrap();

    if readable && c.state() == State::Reading {
        match c.fill(trigger) {
            ReadOutcome::Closed => {
                c.close();
                return EventOutcome::Close;
            }
            ReadOutcome::Progressed => {}
        }
        match c.process(doc_root) {
            ProcessOutcome::NeedMoreData => return EventOutcome::Rearm(Interest::READABLE),
            ProcessOutcome::Ready => {}
        }
    }

    if writable || c.state() == State::Writing {
        return match c.drain_write(trigger) {
            WriteOutcome::Complete if c.keep_alive() => {
                c.reset_for_reuse();
                EventOutcome::Rearm(Interest::READABLE)
            }
            WriteOutcome::Complete => {
                c.close();
                EventOutcome::Close
            }
            WriteOutcome::WouldBlock => EventOutcome::Rearm(Interest::WRITABLE),
            WriteOutcome::Closed => {
                c.close();
                EventOutcome::Close
            }
        };
    }

    EventOutcome::Rearm(Interest::READABLE)
}

fn reject_busy(fd: RawFd) {
    unsafe {
        libc::send(fd, SERVER_BUSY.as_ptr() as *const libc::c_void, SERVER_BUSY.len(), 0);
        libc::close(fd);
    }
}


fn create_listen_socket(port: u16, opt_linger: bool) -> std::io::Result<StdTcpListener> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = StdTcpListener::bind(addr)?;
    let fd = listener.as_raw_fd();

    let linger = libc::linger {
        l_onoff: opt_linger as libc::c_int,
        l_linger: 1,
    };
    set_sockopt(fd, libc::SOL_SOCKET, libc::SO_LINGER, &linger)?;

    let reuse: libc::c_int = 1;
    set_sockopt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, &reuse)?;

    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn set_sockopt<T>(fd: RawFd, level: libc::c_int, name: libc::c_int, value: &T) -> std::io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            value as *const T as *const libc::c_void,
            std::mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
