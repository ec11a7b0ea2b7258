//! Which audio process objects a tap includes.
//!
//! CoreAudio taps list process objects explicitly, so tree scope has to be
//! resolved by hand: every audio process whose pid descends from the target
//! joins the tap. Browsers and Electron apps render audio from helper
//! processes, which makes this the useful default.

use process_tap_core::ProcessScope;

/// Parent chains longer than this are treated as broken.
const MAX_DEPTH: usize = 64;

/// An entry of `kAudioHardwarePropertyProcessObjectList`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioProcess {
    pub object_id: u32,
    pub pid: i32,
}

/// Walk `pid`'s parents looking for `ancestor`. `parent_of` returns `None`
/// when a pid has no known parent (exited, or no permission).
pub fn descends_from<F>(pid: i32, ancestor: i32, parent_of: F) -> bool
where
    F: Fn(i32) -> Option<i32>,
{
    let mut current = pid;
    for _ in 0..MAX_DEPTH {
        match parent_of(current) {
            Some(parent) if parent == ancestor => return true,
            Some(parent) if parent <= 1 || parent == current => return false,
            Some(parent) => current = parent,
            None => return false,
        }
    }
    false
}

/// Tap members for `target`, target object first.
///
/// `SingleProcess` yields just the target. `ProcessTree` adds every listed
/// audio process descending from the target; duplicates are skipped. A
/// target without an audio object of its own may still be tapped through
/// its descendants.
pub fn select_tap_members<F>(
    target_pid: i32,
    target_object: Option<u32>,
    audio_processes: &[AudioProcess],
    scope: ProcessScope,
    parent_of: F,
) -> Vec<u32>
where
    F: Fn(i32) -> Option<i32>,
{
    let mut members: Vec<u32> = target_object.into_iter().collect();
    if scope == ProcessScope::SingleProcess {
        return members;
    }

    for process in audio_processes {
        if process.pid == target_pid || members.contains(&process.object_id) {
            continue;
        }
        if descends_from(process.pid, target_pid, &parent_of) {
            log::debug!(
                "Including descendant pid {} (audio object {}) in tap for pid {}",
                process.pid,
                process.object_id,
                target_pid
            );
            members.push(process.object_id);
        }
    }
    members
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    // launchd(1) ─► browser(100) ─► gpu(110), renderer(120) ─► worklet(121)
    //           └─► unrelated(200)
    fn tree() -> HashMap<i32, i32> {
        HashMap::from([(100, 1), (110, 100), (120, 100), (121, 120), (200, 1)])
    }

    fn audio() -> Vec<AudioProcess> {
        vec![
            AudioProcess { object_id: 10, pid: 100 },
            AudioProcess { object_id: 11, pid: 110 },
            AudioProcess { object_id: 12, pid: 121 },
            AudioProcess { object_id: 20, pid: 200 },
        ]
    }

    #[test]
    fn descendants_at_any_depth() {
        let parents = tree();
        let parent_of = |pid: i32| parents.get(&pid).copied();
        assert!(descends_from(110, 100, parent_of));
        assert!(descends_from(121, 100, parent_of));
        assert!(!descends_from(200, 100, parent_of));
        assert!(!descends_from(100, 100, parent_of));
        assert!(!descends_from(999, 100, parent_of));
    }

    #[test]
    fn parent_cycles_terminate() {
        let parents = HashMap::from([(5, 6), (6, 5)]);
        assert!(!descends_from(5, 100, |pid| parents.get(&pid).copied()));
        let own_parent = HashMap::from([(7, 7)]);
        assert!(!descends_from(7, 100, |pid| own_parent.get(&pid).copied()));
    }

    #[test]
    fn tree_scope_collects_descendants() {
        let parents = tree();
        let members = select_tap_members(100, Some(10), &audio(), ProcessScope::ProcessTree, |pid| {
            parents.get(&pid).copied()
        });
        assert_eq!(members, vec![10, 11, 12]);
    }

    #[test]
    fn single_scope_is_target_only() {
        let parents = tree();
        let members = select_tap_members(100, Some(10), &audio(), ProcessScope::SingleProcess, |pid| {
            parents.get(&pid).copied()
        });
        assert_eq!(members, vec![10]);
    }

    #[test]
    fn leaf_target_has_no_extra_members() {
        let parents = tree();
        let members = select_tap_members(121, Some(12), &audio(), ProcessScope::ProcessTree, |pid| {
            parents.get(&pid).copied()
        });
        assert_eq!(members, vec![12]);
    }

    #[test]
    fn silent_parent_is_tapped_through_children() {
        let parents = tree();
        let parent_of = |pid: i32| parents.get(&pid).copied();
        let helpers = [AudioProcess { object_id: 12, pid: 121 }];
        assert_eq!(
            select_tap_members(100, None, &helpers, ProcessScope::ProcessTree, parent_of),
            vec![12]
        );
        assert!(select_tap_members(100, None, &helpers, ProcessScope::SingleProcess, parent_of).is_empty());
    }
}
