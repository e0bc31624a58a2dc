//! Property-based tests for the wire and domain types.
//!
//! Uses proptest to verify:
//! 1. Status parsing accepts any casing and separator style of a status name.
//! 2. Integer-shaped identifiers go out as JSON numbers and come back equal.
//! 3. Join codes normalize to upper case and match stored codes in any case.
//! 4. Capturing a patch's fields and applying the capture restores a task.
//! 5. Random bytes never cause a panic in `decode`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::NaiveDate;
use proptest::prelude::*;
use taskdeck_proto::codec;
use taskdeck_proto::task::{IdentityId, Scope, Task, TaskId, TaskPatch, TaskRecord, TaskStatus};
use taskdeck_proto::team::{JOIN_CODE_LEN, JoinCode, JoinCodeError, TeamId};

// --- Strategies ---

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(TaskStatus::ALL.to_vec())
}

fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (2000i32..2100, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default())
}

fn arb_scope() -> impl Strategy<Value = Scope> {
    prop_oneof![
        any::<u32>().prop_map(|n| Scope::Personal {
            owner: IdentityId::from(i64::from(n)),
        }),
        any::<u32>().prop_map(|n| Scope::Team {
            team_id: TeamId::from(i64::from(n)),
        }),
    ]
}

fn arb_task() -> impl Strategy<Value = Task> {
    (
        any::<u32>(),
        "[a-zA-Z0-9 ]{1,40}",
        arb_status(),
        proptest::option::of("[a-z ]{0,60}"),
        proptest::option::of(arb_date()),
        proptest::option::of("[a-z]{1,12}"),
        arb_scope(),
    )
        .prop_map(
            |(id, title, status, description, due, category, scope)| Task {
                id: TaskId::from(i64::from(id)),
                title,
                status,
                description,
                due,
                category,
                assignees: Vec::new(),
                scope,
            },
        )
}

/// A nullable field edit: untouched, cleared, or set.
fn arb_edit<T: std::fmt::Debug + Clone + 'static>(
    value: impl Strategy<Value = T> + 'static,
) -> impl Strategy<Value = Option<Option<T>>> {
    proptest::option::of(proptest::option::of(value))
}

fn arb_patch() -> impl Strategy<Value = TaskPatch> {
    (
        proptest::option::of("[a-zA-Z ]{1,40}"),
        arb_edit("[a-z ]{0,60}"),
        arb_edit(arb_date()),
        proptest::option::of(arb_status()),
        arb_edit("[a-z]{1,12}"),
    )
        .prop_map(|(title, description, due, status, category)| TaskPatch {
            title,
            description,
            due,
            status,
            category,
        })
}

/// Rewrites a status name with random casing and separator style.
fn arb_spelling() -> impl Strategy<Value = (TaskStatus, String)> {
    (
        arb_status(),
        prop::collection::vec(any::<bool>(), 16),
        prop::sample::select(vec![" ", "-", "_", ""]),
        "[ ]{0,3}",
    )
        .prop_map(|(status, upper, sep, pad)| {
            let name: String = status
                .to_string()
                .chars()
                .zip(upper.iter().cycle())
                .map(|(c, &up)| {
                    if c == ' ' {
                        sep.to_string()
                    } else if up {
                        c.to_ascii_uppercase().to_string()
                    } else {
                        c.to_ascii_lowercase().to_string()
                    }
                })
                .collect();
            (status, format!("{pad}{name}{pad}"))
        })
}

// --- Property tests ---

proptest! {
    /// Any casing or separator style of a status name parses back to it.
    #[test]
    fn status_parsing_ignores_case_and_separators((status, spelling) in arb_spelling()) {
        prop_assert_eq!(spelling.parse::<TaskStatus>(), Ok(status));
    }

    /// Strings that are not status names never parse.
    #[test]
    fn unknown_status_names_are_rejected(word in "[a-z]{1,12}") {
        let known = ["pending", "inprogress", "completed", "done", "overdue"];
        prop_assume!(!known.contains(&word.as_str()));
        prop_assert!(word.parse::<TaskStatus>().is_err());
    }

    /// Integer-shaped IDs are written as JSON numbers.
    #[test]
    fn numeric_ids_stay_numeric(n in any::<i64>()) {
        let id = TaskId::from(n);
        let text = codec::encode_string(&id).expect("encode should succeed");
        prop_assert_eq!(&text, &n.to_string());
        let back: TaskId = codec::decode(text.as_bytes()).expect("decode should succeed");
        prop_assert_eq!(back, id);
    }

    /// A record decodes from the service's shape with either ID form.
    #[test]
    fn task_record_accepts_both_id_forms(n in any::<u32>(), title in "[a-zA-Z ]{1,30}") {
        let numeric = format!(r#"{{"id":{n},"title":"{title}"}}"#);
        let text = format!(r#"{{"id":"{n}","title":"{title}"}}"#);
        let a: TaskRecord = codec::decode(numeric.as_bytes()).expect("decode should succeed");
        let b: TaskRecord = codec::decode(text.as_bytes()).expect("decode should succeed");
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.status, TaskStatus::Pending);
    }

    /// Join codes are trimmed and upper-cased, and match stored codes in any case.
    #[test]
    fn join_codes_normalize(code in "[a-zA-Z0-9]{6}", pad in "[ \t]{0,3}") {
        let parsed = JoinCode::parse(&format!("{pad}{code}{pad}")).expect("six characters");
        prop_assert_eq!(parsed.as_str(), code.to_uppercase());
        prop_assert!(parsed.matches(&code.to_lowercase()));
        prop_assert!(parsed.matches(&code));
    }

    /// Codes of any other length are rejected with their length.
    #[test]
    fn join_codes_of_wrong_length_fail(code in "[A-Z0-9]{0,12}") {
        prop_assume!(code.len() != JOIN_CODE_LEN);
        prop_assert_eq!(JoinCode::parse(&code), Err(JoinCodeError::WrongLength(code.len())));
    }

    /// Applying a patch then its capture gives back the original task.
    #[test]
    fn capture_restores_patched_fields(task in arb_task(), patch in arb_patch()) {
        let before = patch.capture(&task);
        prop_assert_eq!(before.fields(), patch.fields());

        let mut edited = task.clone();
        edited.apply(&patch);
        edited.apply(&before);
        prop_assert_eq!(edited, task);
    }

    /// A patch's wire form names exactly its touched fields.
    #[test]
    fn patch_sends_only_touched_fields(patch in arb_patch()) {
        let value: serde_json::Value =
            serde_json::from_slice(&codec::encode(&patch).expect("encode should succeed"))
                .expect("valid JSON");
        let mut keys: Vec<&str> = value
            .as_object()
            .expect("object")
            .keys()
            .map(String::as_str)
            .collect();
        let mut fields = patch.fields();
        keys.sort_unstable();
        fields.sort_unstable();
        prop_assert_eq!(keys, fields);
    }

    /// Random bytes never cause a panic when decoded.
    #[test]
    fn random_bytes_decode_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode::<TaskRecord>(&bytes);
        let _ = codec::decode_optional::<TaskRecord>(&bytes);
    }
}
