//! # Session Driver
//!
//! Runs a [`Session`] as a single logical actor:
//!
//! ```text
//!  mesh provider ──► crossbeam queue ──► pump(now) ──► handle_event
//!                                            │
//!                                 TickLoop ──┴──► update(dt)
//!
//!  game threads ──► Arc<Mutex<Session>> (allocate / free / read)
//! ```
//!
//! Queued events are drained before any tick runs, and both happen under one
//! coarse lock, so blame evaluation always sees a consistent peer table.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use super::{Session, TickLoop};
use crate::transport::{MeshEvent, MeshTransport};

/// Owns a session, its transport and its inbound queue.
pub struct SessionDriver<T: MeshTransport> {
    session: Arc<Mutex<Session>>,
    transport: T,
    events: Receiver<MeshEvent>,
    tick_loop: TickLoop,
}

impl<T: MeshTransport> SessionDriver<T> {
    /// Creates a driver ticking at the session's heartbeat interval.
    #[must_use]
    pub fn new(session: Session, transport: T, events: Receiver<MeshEvent>) -> Self {
        let tick_loop = TickLoop::from_secs_f64(session.config().heartbeat_interval_secs);
        Self {
            session: Arc::new(Mutex::new(session)),
            transport,
            events,
            tick_loop,
        }
    }

    /// Shared handle to the session for other threads.
    #[must_use]
    pub fn session(&self) -> Arc<Mutex<Session>> {
        Arc::clone(&self.session)
    }

    /// The transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// The tick controller.
    #[must_use]
    pub const fn tick_loop(&self) -> &TickLoop {
        &self.tick_loop
    }

    /// Drains every queued event, then runs the ticks due at `now`.
    ///
    /// Returns the number of events handled.
    pub fn pump(&mut self, now: Instant) -> usize {
        let mut session = self.session.lock();

        let mut handled = 0;
        for event in self.events.try_iter() {
            if let Err(err) = session.handle_event(event, &mut self.transport) {
                tracing::trace!(error = %err, "inbound event dropped");
            }
            handled += 1;
        }

        let dt = self.tick_loop.tick_duration().as_secs_f64();
        for _ in 0..self.tick_loop.advance(now) {
            if let Err(err) = session.update(dt, &mut self.transport) {
                tracing::warn!(error = %err, "heartbeat failed");
            }
        }

        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use crate::simulation::{LoopbackMesh, NetworkConditions};
    use crate::transport::PeerId;
    use std::time::Duration;

    fn driver(mesh: &LoopbackMesh, id: &str) -> SessionDriver<crate::simulation::LoopbackEndpoint> {
        let session = Session::new(PeerId::from(id), SessionConfig::named(id)).unwrap();
        let (endpoint, events) = mesh.join(id);
        SessionDriver::new(session, endpoint, events)
    }

    #[test]
    fn test_drivers_converge_on_fake_clock() {
        let mesh = LoopbackMesh::new(NetworkConditions::PERFECT);
        let mut a = driver(&mesh, "a");
        let mut b = driver(&mesh, "b");

        for _ in 0..3 {
            a.session().lock().pool_mut().allocate().unwrap();
        }

        let start = Instant::now();
        for step in 0..40u32 {
            let now = start + Duration::from_millis(u64::from(step) * 50);
            a.pump(now);
            b.pump(now);
        }

        assert!(a.tick_loop().tick_count() >= 15);
        assert_eq!(b.session().lock().pool().allocated(), 3);
        assert_eq!(b.session().lock().pool().guids(), 3);
    }

    #[test]
    fn test_session_handle_is_shared() {
        let mesh = LoopbackMesh::new(NetworkConditions::PERFECT);
        let mut a = driver(&mesh, "a");
        let handle = a.session();

        let worker = std::thread::spawn(move || {
            handle.lock().pool_mut().allocate().map(|r| r.id).unwrap()
        });
        let id = worker.join().unwrap();

        a.pump(Instant::now());
        assert!(a.session().lock().pool().contains(id));
        assert_eq!(a.transport().id().as_str(), "a");
    }
}
