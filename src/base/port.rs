/// Capability interfaces between the allocator and the components on either side of it.
///
/// The allocator owns no references to its neighbours. The simulation top hands them in every
/// cycle, which keeps ownership a tree and lets tests substitute recording doubles.
use crate::alloc::packet::{BackendRequest, BackendResponse, Response, Snoop};
use crate::timeq::Cycle;

/// Upstream side of a requestor port (a CPU lane or accelerator port).
pub trait Requestor {
    /// Hand a completed transaction back. Returning false means the requestor cannot take it
    /// this cycle.
    fn deliver(&mut self, response: Response) -> bool;

    /// A previously rejected submission can now be retried.
    fn notify_retry(&mut self);

    /// Another lane took exclusive ownership of `snoop.addr`.
    fn receive_snoop(&mut self, _snoop: &Snoop) {}
}

/// Downstream cache or memory behind the allocator.
pub trait Backend {
    /// Offer a request. False means the backend is busy; it must later call
    /// `Allocator::on_backend_retry` before the allocator offers anything else.
    fn accept(&mut self, now: Cycle, request: BackendRequest) -> bool;

    /// The allocator's response queue has room again after rejecting a response.
    fn notify_response_retry(&mut self);

    /// Perform an access immediately, outside the timing model.
    fn access_functional(&mut self, request: &BackendRequest) -> BackendResponse;
}

impl<R: Requestor + ?Sized> Requestor for Box<R> {
    fn deliver(&mut self, response: Response) -> bool {
        (**self).deliver(response)
    }

    fn notify_retry(&mut self) {
        (**self).notify_retry()
    }

    fn receive_snoop(&mut self, snoop: &Snoop) {
        (**self).receive_snoop(snoop)
    }
}
