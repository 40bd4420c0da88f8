//! Last-resort panic boundary around handler futures.
//!
//! [`guard`] polls a future inside `catch_unwind`. A panic while polling is
//! turned into a [`Panicked`] value carrying the panic message and the stack
//! trace captured at the panic site.
//!
//! Stack traces come from a process-wide panic hook installed on first use.
//! The hook records a backtrace in a thread-local slot and then defers to the
//! previously installed hook. Unwinding runs on the thread that panicked, so
//! the boundary reads the slot on that same thread right after the unwind is
//! caught.

use core::any::Any;
use core::cell::RefCell;
use core::future::Future;
use core::panic::AssertUnwindSafe;
use futures::FutureExt;
use std::backtrace::Backtrace;
use std::sync::Once;

static INSTALL_HOOK: Once = Once::new();

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// A caught panic.
#[derive(Debug, Clone)]
pub struct Panicked {
    pub message: String,
    pub stack: String,
}

pub fn install_panic_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let stack = Backtrace::force_capture().to_string();
            LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(stack));
            previous(info);
        }));
    });
}

/// Runs `future` to completion, converting a panic into [`Panicked`].
pub async fn guard<F: Future>(future: F) -> Result<F::Output, Panicked> {
    install_panic_hook();
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(output) => Ok(output),
        Err(payload) => {
            let stack = LAST_BACKTRACE
                .with(|slot| slot.borrow_mut().take())
                .unwrap_or_else(|| Backtrace::force_capture().to_string());
            Err(Panicked {
                message: panic_message(payload.as_ref()),
                stack,
            })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = scalar_message(payload) {
        message
    } else {
        format!("non-string panic payload ({:?})", (*payload).type_id())
    }
}

/// Renders `panic_any` payloads of primitive types.
fn scalar_message(payload: &(dyn Any + Send)) -> Option<String> {
    macro_rules! display_as {
        ($($ty:ty),+) => {
            $(
                if let Some(value) = payload.downcast_ref::<$ty>() {
                    return Some(value.to_string());
                }
            )+
        };
    }
    display_as!(
        bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn explode() -> u32 {
        panic!("boom")
    }

    async fn numeric() -> u32 {
        std::panic::panic_any(17_u8)
    }

    struct Opaque;

    async fn opaque() -> u32 {
        std::panic::panic_any(Opaque)
    }

    #[tokio::test]
    async fn passes_through_normal_output() {
        assert_eq!(guard(async { 7 }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn captures_str_payload_and_stack() {
        let caught = guard(explode()).await.unwrap_err();
        assert_eq!(caught.message, "boom");
        assert!(!caught.stack.is_empty());
    }

    #[tokio::test]
    async fn captures_formatted_payload() {
        let id = 42;
        let caught = guard(async move {
            assert!(id < 0, "user {id} exploded");
        })
        .await
        .unwrap_err();
        assert_eq!(caught.message, "user 42 exploded");
    }

    #[tokio::test]
    async fn scalar_payload_is_rendered() {
        let caught = guard(numeric()).await.unwrap_err();
        assert_eq!(caught.message, "17");
    }

    #[tokio::test]
    async fn opaque_payload_names_its_type_id() {
        let caught = guard(opaque()).await.unwrap_err();
        let expected = format!(
            "non-string panic payload ({:?})",
            core::any::TypeId::of::<Opaque>()
        );
        assert_eq!(caught.message, expected);
    }
}
