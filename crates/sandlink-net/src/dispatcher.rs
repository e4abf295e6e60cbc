//! Single-threaded readiness loop over registered sockets.
//!
//! Each listener is a boxed callback keyed by a [`ListenerKey`]. Callbacks get
//! the loop's context, the dispatcher itself (to add or remove listeners) and
//! the readiness that fired. Another thread can wake a blocked loop through a
//! [`DispatcherHandle`], either just to interrupt it or to stop it.
//!
//! Registration is edge-triggered, so a readable callback must drain its
//! socket until it would block.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};

const WAKE_TOKEN: Token = Token(usize::MAX);
const EVENT_CAPACITY: usize = 256;

/// Identity of one registration. Keys are never reused within a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerKey(usize);

impl ListenerKey {
    fn token(self) -> Token {
        Token(self.0)
    }
}

/// Which listener fired. Hang-ups and socket errors surface through the
/// listener's next read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub key: ListenerKey,
}

/// Returned by a callback to keep or drop its registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Keep,
    /// Drop the callback. The owner of the source is responsible for
    /// deregistering or dropping it.
    Remove,
}

pub type Callback<C> = Box<dyn FnMut(&mut C, &mut Dispatcher<C>, Readiness) -> Flow + Send>;

struct InFlight {
    key: ListenerKey,
    removed: bool,
}

/// Cross-thread control of a [`Dispatcher`].
#[derive(Clone)]
pub struct DispatcherHandle {
    waker: Arc<Waker>,
    stopped: Arc<AtomicBool>,
}

impl DispatcherHandle {
    /// Make a blocked `dispatch_next` return without any listener firing.
    pub fn interrupt(&self) -> io::Result<()> {
        self.waker.wake()
    }

    /// Ask the loop to exit after its current iteration.
    pub fn stop(&self) -> io::Result<()> {
        self.stopped.store(true, Ordering::Release);
        self.waker.wake()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Readiness loop with per-listener callbacks over a context `C`.
pub struct Dispatcher<C> {
    poll: Poll,
    events: Events,
    listeners: HashMap<ListenerKey, Callback<C>>,
    next_key: usize,
    in_flight: Option<InFlight>,
    ready: Vec<Readiness>,
    handle: DispatcherHandle,
}

impl<C> Dispatcher<C> {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            listeners: HashMap::new(),
            next_key: 0,
            in_flight: None,
            ready: Vec::new(),
            handle: DispatcherHandle {
                waker: Arc::new(waker),
                stopped: Arc::new(AtomicBool::new(false)),
            },
        })
    }

    /// A handle for interrupting or stopping this loop from any thread.
    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    /// Number of live registrations.
    pub fn listener_count(&self) -> usize {
        self.listeners.len() + usize::from(self.in_flight.as_ref().is_some_and(|f| !f.removed))
    }

    /// Register `source` and call `callback` whenever it becomes ready.
    pub fn add_listener<S>(
        &mut self,
        source: &mut S,
        interest: Interest,
        callback: Callback<C>,
    ) -> io::Result<ListenerKey>
    where
        S: Source + ?Sized,
    {
        let key = ListenerKey(self.next_key);
        self.poll.registry().register(source, key.token(), interest)?;
        self.next_key += 1;
        self.listeners.insert(key, callback);
        Ok(key)
    }

    /// Deregister `source` and drop its callback.
    ///
    /// Once this returns the callback is never invoked again, even for events
    /// already collected in the current iteration.
    pub fn remove_listener<S>(&mut self, key: ListenerKey, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.listeners.remove(&key);
        if let Some(flight) = self.in_flight.as_mut()
            && flight.key == key
        {
            flight.removed = true;
        }
        self.poll.registry().deregister(source)
    }

    /// Block until at least one listener is ready or the loop is interrupted,
    /// then run each ready callback once.
    ///
    /// Returns `false` once a stop has been requested.
    pub fn dispatch_next(&mut self, ctx: &mut C) -> io::Result<bool> {
        self.dispatch_timeout(ctx, None)
    }

    /// Like [`dispatch_next`](Self::dispatch_next), but gives up waiting after
    /// `timeout`.
    pub fn dispatch_timeout(&mut self, ctx: &mut C, timeout: Option<Duration>) -> io::Result<bool> {
        if self.handle.is_stopped() {
            return Ok(false);
        }
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                return Ok(!self.handle.is_stopped());
            }
            Err(err) => return Err(err),
        }

        let mut ready = std::mem::take(&mut self.ready);
        ready.clear();
        ready.extend(
            self.events
                .iter()
                .filter(|event| event.token() != WAKE_TOKEN)
                .map(|event| Readiness {
                    key: ListenerKey(event.token().0),
                }),
        );

        for readiness in &ready {
            let Some(mut callback) = self.listeners.remove(&readiness.key) else {
                continue;
            };
            self.in_flight = Some(InFlight {
                key: readiness.key,
                removed: false,
            });
            let flow = callback(ctx, self, *readiness);
            let removed = self.in_flight.take().is_some_and(|flight| flight.removed);
            if flow == Flow::Keep && !removed {
                self.listeners.insert(readiness.key, callback);
            }
        }
        self.ready = ready;

        Ok(!self.handle.is_stopped())
    }

    /// Dispatch until a stop is requested.
    pub fn run(&mut self, ctx: &mut C) -> io::Result<()> {
        while self.dispatch_next(ctx)? {}
        Ok(())
    }
}
