//! Globe/Fn key watcher spawned by the hotkey engine.
//!
//! The Globe key never produces ordinary key events, only a change of the
//! secondary-Fn modifier flag. This helper installs a listen-only event tap on
//! flag changes and reports transitions on stdout, one token per line:
//! `READY` once the tap is live, then `FN_DOWN` / `FN_UP`. SIGTERM or SIGINT
//! end it with status 0.

use std::process::ExitCode;

#[cfg(target_os = "macos")]
fn main() -> ExitCode {
    macos::run()
}

#[cfg(not(target_os = "macos"))]
#[allow(clippy::print_stderr)]
fn main() -> ExitCode {
    eprintln!("ERROR: globe-key-listener only runs on macOS");
    ExitCode::FAILURE
}

#[cfg(target_os = "macos")]
mod macos {
    use core_foundation::runloop::{kCFRunLoopCommonModes, CFRunLoop};
    use core_graphics::event::{
        CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
        CGEventTapPlacement, CGEventTapProxy, CGEventType,
    };
    use std::cell::Cell;
    use std::io::{self, Write};
    use std::process::ExitCode;

    fn emit(token: &str) {
        let mut out = io::stdout().lock();
        if writeln!(out, "{token}").and_then(|()| out.flush()).is_err() {
            // Parent closed the pipe
            CFRunLoop::get_current().stop();
        }
    }

    #[allow(clippy::print_stderr)]
    pub fn run() -> ExitCode {
        if let Err(e) = ctrlc::set_handler(|| CFRunLoop::get_main().stop()) {
            eprintln!("ERROR: failed to install signal handler: {e}");
            return ExitCode::FAILURE;
        }

        let fn_down = Cell::new(false);
        let callback = |_proxy: CGEventTapProxy,
                        event_type: CGEventType,
                        event: &CGEvent|
         -> Option<CGEvent> {
            if matches!(event_type, CGEventType::FlagsChanged) {
                let held = event
                    .get_flags()
                    .contains(CGEventFlags::CGEventFlagSecondaryFn);
                if held != fn_down.get() {
                    fn_down.set(held);
                    emit(if held { "FN_DOWN" } else { "FN_UP" });
                }
            }
            Some(event.clone())
        };

        let Ok(tap) = CGEventTap::new(
            CGEventTapLocation::Session,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::ListenOnly,
            vec![CGEventType::FlagsChanged],
            callback,
        ) else {
            eprintln!("ERROR: Failed to create event tap. Check Accessibility permissions.");
            return ExitCode::FAILURE;
        };

        let Ok(source) = tap.mach_port.create_runloop_source(0) else {
            eprintln!("ERROR: Failed to create run loop source for event tap.");
            return ExitCode::FAILURE;
        };

        let run_loop = CFRunLoop::get_current();
        #[allow(unsafe_code)]
        // SAFETY: kCFRunLoopCommonModes is an immutable CoreFoundation constant.
        unsafe {
            run_loop.add_source(&source, kCFRunLoopCommonModes);
        }
        tap.enable();

        emit("READY");
        CFRunLoop::run_current();
        ExitCode::SUCCESS
    }
}
