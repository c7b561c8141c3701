//! Builds a fresh handler instance for each call, generalizing
//! grpc-dotnet's `IGrpcServiceActivator<T>` (a DI-scoped instance per call)
//! onto Rust's idiomatic equivalent: a cheaply `Clone`-able service that
//! hands out a clone to `tower::Service::call` rather than a container
//! resolving a new instance (`spec.md` §4.10, Service Activator).
//!
//! Most generated services need nothing more than `#[derive(Clone)]` plus
//! `Arc` around any genuinely shared state, which already gets a
//! clone-per-call via [`ActivatedService::activate`]'s blanket impl. This
//! trait exists for the uncommon case: a service whose construction needs
//! something call-scoped (e.g. a per-call tracing span) that plain
//! `Clone` can't express.

/// Produces the handler instance a single call will run against.
pub trait ServiceActivator<S> {
    /// Builds (or clones) one instance of the handler.
    fn activate(&self) -> S;
}

/// Wraps an existing shared instance, handing out a clone per call. This is
/// what generated service registration uses in practice: the handler is
/// built once (often wrapping `Arc<dyn Trait>` application state) and every
/// call clones the wrapper, not the state underneath.
#[derive(Debug, Clone)]
pub struct SharedActivator<S> {
    shared: S,
}

impl<S: Clone> SharedActivator<S> {
    /// Wraps `shared` so [`ServiceActivator::activate`] clones it per call.
    pub fn new(shared: S) -> Self {
        SharedActivator { shared }
    }
}

impl<S: Clone> ServiceActivator<S> for SharedActivator<S> {
    fn activate(&self) -> S {
        self.shared.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Handler(u32);

    #[test]
    fn shared_activator_clones_wrapped_instance() {
        let activator = SharedActivator::new(Handler(7));
        assert_eq!(activator.activate().0, 7);
        assert_eq!(activator.activate().0, 7);
    }
}
