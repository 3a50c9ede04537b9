//! Echo-back demo application, grounded on
//! `original_source/src/application/echo/echo.cc`: deploys a single parallel worker on
//! every physical core that sends every message it receives straight back to its sender.
//! `dlopen`ed via `MENABREA_APP_LIST` (spec.md §6); see `platform_dispatch::app_libs` for
//! the four C-linkage symbols this library exports.

use platform_dispatch::runtime;
use platform_kernel::ids::WorkerId;
use platform_kernel::message::{get_message_sender, Message};
use platform_kernel::worker_table::WorkerControl;

/// `ECHO_LOCAL_ID` in the original: a fixed static id in the reserved range so the service
/// can always be found at the same address regardless of deployment order.
const ECHO_LOCAL_ID: u16 = 0x0700;

fn echo_service(_own_id: WorkerId, message: Message) -> WorkerControl {
    let sender = get_message_sender(message);
    runtime::send_message(message, sender);
    WorkerControl::Continue
}

/// # Safety
/// Called exactly once, from the main dispatcher thread, before any dispatcher thread
/// starts — the same precondition `dlopen`+symbol resolution gives the original.
#[no_mangle]
pub extern "C" fn ApplicationGlobalInit() {
    let worker_id =
        runtime::deploy_simple_parallel_worker("EchoService", ECHO_LOCAL_ID, runtime::get_all_cores_mask(), echo_service);
    if worker_id.is_invalid() {
        tracing::error!("Failed to deploy the echo service worker");
    }
}

#[no_mangle]
pub extern "C" fn ApplicationLocalInit(_core: i32) {}

#[no_mangle]
pub extern "C" fn ApplicationLocalExit(_core: i32) {}

#[no_mangle]
pub extern "C" fn ApplicationGlobalExit() {
    runtime::terminate_worker(runtime::make_worker_id(runtime::get_own_node_id(), ECHO_LOCAL_ID));
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform_kernel::message::{create_message, destroy_message};

    #[test]
    fn echo_service_always_continues_and_consumes_the_message() {
        let message = create_message(0xDEAD, 4);
        let control = echo_service(WorkerId::INVALID, message);
        assert_eq!(control, WorkerControl::Continue);
        // `send_message` already consumed `message` (no active dispatch in a unit test, so
        // it logs and frees it); a redundant destroy on an already-freed slot is inert.
        destroy_message(message);
    }
}
