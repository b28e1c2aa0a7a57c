//! Thread-local stack of context frames.
//!
//! Only [`crate::scope`] pushes and pops frames and only the resolver reads
//! them. Every thread has its own stack, so nothing here needs a lock.

use std::cell::{Cell, RefCell};

use tracing::{trace, warn};

use crate::options::Overrides;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Enforce,
    Sinks,
    Privilege,
    Cwd,
    Env,
    Shell,
    /// Hides every frame below it.
    Fresh,
}

impl FrameKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Enforce => "enforce",
            Self::Sinks => "sinks",
            Self::Privilege => "privilege",
            Self::Cwd => "cwd",
            Self::Env => "env",
            Self::Shell => "shell",
            Self::Fresh => "fresh",
        }
    }
}

struct Frame {
    id: u64,
    kind: FrameKind,
    overrides: Overrides,
}

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
    static NEXT_ID: Cell<u64> = const { Cell::new(1) };
}

/// Proof of a push. Not `Clone`, so a frame can only be popped once.
#[derive(Debug)]
pub(crate) struct FrameToken {
    id: u64,
    kind: FrameKind,
}

pub(crate) fn push(kind: FrameKind, overrides: Overrides) -> FrameToken {
    let id = NEXT_ID.with(|next| {
        let id = next.get();
        next.set(id.wrapping_add(1));
        id
    });
    FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        frames.push(Frame { id, kind, overrides });
        trace!(frame = id, kind = kind.as_str(), depth = frames.len(), "pushed context frame");
    });
    FrameToken { id, kind }
}

pub(crate) fn pop(token: FrameToken) {
    // The stack may already be gone if this runs during thread teardown.
    let _ = FRAMES.try_with(|frames| {
        let mut frames = frames.borrow_mut();
        match frames.iter().rposition(|frame| frame.id == token.id) {
            Some(index) => {
                if index + 1 != frames.len() {
                    warn!(
                        frame = token.id,
                        kind = token.kind.as_str(),
                        above = frames.len() - index - 1,
                        "context frame popped out of order"
                    );
                }
                let frame = frames.remove(index);
                trace!(frame = frame.id, kind = frame.kind.as_str(), depth = frames.len(), "popped context frame");
            }
            None => warn!(frame = token.id, "context frame already gone"),
        }
    });
}

/// Run `f` with the active frames' overrides, innermost first. Frames below
/// the innermost [`FrameKind::Fresh`] frame are not active.
pub(crate) fn with_layers<R>(f: impl FnOnce(&[&Overrides]) -> R) -> R {
    FRAMES.with(|frames| {
        let frames = frames.borrow();
        let layers: Vec<&Overrides> = frames
            .iter()
            .rev()
            .take_while(|frame| frame.kind != FrameKind::Fresh)
            .map(|frame| &frame.overrides)
            .collect();
        f(&layers)
    })
}

#[cfg(test)]
pub(crate) fn depth() -> usize {
    FRAMES.with(|frames| frames.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Enforcement;

    fn enforce(code: i32) -> Overrides {
        Overrides {
            enforce: Some(Enforcement::Code(code)),
            ..Overrides::default()
        }
    }

    #[test]
    fn layers_are_innermost_first() {
        let outer = push(FrameKind::Enforce, enforce(1));
        let inner = push(FrameKind::Enforce, enforce(2));
        let seen: Vec<_> = with_layers(|layers| layers.iter().map(|layer| layer.enforce).collect());
        assert_eq!(seen, vec![Some(Enforcement::Code(2)), Some(Enforcement::Code(1))]);
        pop(inner);
        pop(outer);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn out_of_order_pop_removes_the_right_frame() {
        let outer = push(FrameKind::Enforce, enforce(1));
        let inner = push(FrameKind::Cwd, Overrides::default());
        pop(outer);
        assert_eq!(depth(), 1);
        let remaining = with_layers(|layers| layers[0].enforce);
        assert_eq!(remaining, None);
        pop(inner);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn fresh_frame_hides_outer_frames_until_popped() {
        let outer = push(FrameKind::Enforce, enforce(1));
        let fresh = push(FrameKind::Fresh, Overrides::default());
        assert_eq!(with_layers(|layers| layers.len()), 0);

        let inner = push(FrameKind::Enforce, enforce(2));
        let seen: Vec<_> = with_layers(|layers| layers.iter().map(|layer| layer.enforce).collect());
        assert_eq!(seen, vec![Some(Enforcement::Code(2))]);

        pop(inner);
        pop(fresh);
        assert_eq!(with_layers(|layers| layers[0].enforce), Some(Enforcement::Code(1)));
        pop(outer);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn frames_do_not_cross_threads() {
        let token = push(FrameKind::Enforce, enforce(7));
        let seen = std::thread::spawn(depth).join().unwrap_or(usize::MAX);
        assert_eq!(seen, 0);
        pop(token);
    }
}
