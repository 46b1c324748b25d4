use std::fs;
use std::path::PathBuf;

use monitorkit_core::{
    ContractViolation, HolderState, MonitorOp, MonitorState, monitor_contract_transition,
};

#[derive(Clone, Copy)]
struct Case {
    state: MonitorState,
    holder: HolderState,
    op: MonitorOp,
    expected_state: MonitorState,
    expected_holder: HolderState,
    expected_violation: Option<ContractViolation>,
    expected_blocks: bool,
}

fn workspace_root() -> PathBuf {
    let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest.parent().unwrap().parent().unwrap().to_path_buf()
}

fn state_name(state: MonitorState) -> &'static str {
    match state {
        MonitorState::Uninitialized => "Uninitialized",
        MonitorState::Initialized => "Initialized",
        MonitorState::Destroyed => "Destroyed",
    }
}

fn holder_name(holder: HolderState) -> &'static str {
    match holder {
        HolderState::NotHolding => "NotHolding",
        HolderState::Holding => "Holding",
        HolderState::Waiting => "Waiting",
    }
}

fn op_name(op: MonitorOp) -> &'static str {
    match op {
        MonitorOp::Construct => "Construct",
        MonitorOp::Destroy => "Destroy",
        MonitorOp::Lock => "Lock",
        MonitorOp::Unlock => "Unlock",
        MonitorOp::Wait => "Wait",
        MonitorOp::Notify => "Notify",
        MonitorOp::NotifyAll => "NotifyAll",
        MonitorOp::Wake => "Wake",
    }
}

const fn ok(
    state: MonitorState,
    holder: HolderState,
    op: MonitorOp,
    expected_state: MonitorState,
    expected_holder: HolderState,
    expected_blocks: bool,
) -> Case {
    Case {
        state,
        holder,
        op,
        expected_state,
        expected_holder,
        expected_violation: None,
        expected_blocks,
    }
}

const fn violation(
    state: MonitorState,
    holder: HolderState,
    op: MonitorOp,
    expected: ContractViolation,
) -> Case {
    Case {
        state,
        holder,
        op,
        expected_state: state,
        expected_holder: holder,
        expected_violation: Some(expected),
        expected_blocks: false,
    }
}

fn matrix_cases() -> Vec<Case> {
    use ContractViolation as V;
    use HolderState::{Holding, NotHolding, Waiting};
    use MonitorOp::{Construct, Destroy, Lock, Notify, NotifyAll, Unlock, Wait, Wake};
    use MonitorState::{Destroyed, Initialized, Uninitialized};

    let mut cases = vec![
        ok(Uninitialized, NotHolding, Construct, Initialized, NotHolding, false),
        // Not holding.
        violation(Initialized, NotHolding, Construct, V::DoubleInit),
        ok(Initialized, NotHolding, Destroy, Destroyed, NotHolding, false),
        ok(Initialized, NotHolding, Lock, Initialized, Holding, true),
        violation(Initialized, NotHolding, Unlock, V::UnlockWithoutLock),
        violation(Initialized, NotHolding, Wait, V::WaitWithoutLock),
        violation(Initialized, NotHolding, Notify, V::NotifyWithoutLock),
        violation(Initialized, NotHolding, NotifyAll, V::NotifyAllWithoutLock),
        violation(Initialized, NotHolding, Wake, V::WaitWithoutLock),
        // Holding.
        violation(Initialized, Holding, Construct, V::DoubleInit),
        violation(Initialized, Holding, Destroy, V::DestroyWhileHeld),
        ok(Initialized, Holding, Lock, Initialized, Holding, true),
        ok(Initialized, Holding, Unlock, Initialized, NotHolding, false),
        ok(Initialized, Holding, Wait, Initialized, Waiting, true),
        ok(Initialized, Holding, Notify, Initialized, Holding, false),
        ok(Initialized, Holding, NotifyAll, Initialized, Holding, false),
        violation(Initialized, Holding, Wake, V::WaitWithoutLock),
        // Waiting.
        violation(Initialized, Waiting, Construct, V::DoubleInit),
        violation(Initialized, Waiting, Destroy, V::DestroyWhileHeld),
        ok(Initialized, Waiting, Lock, Initialized, Waiting, true),
        violation(Initialized, Waiting, Unlock, V::UnlockWithoutLock),
        violation(Initialized, Waiting, Wait, V::WaitWithoutLock),
        violation(Initialized, Waiting, Notify, V::NotifyWithoutLock),
        violation(Initialized, Waiting, NotifyAll, V::NotifyAllWithoutLock),
        ok(Initialized, Waiting, Wake, Initialized, Holding, true),
        // Destroyed.
        violation(Destroyed, NotHolding, Construct, V::DoubleInit),
        violation(Destroyed, NotHolding, Destroy, V::DoubleDestroy),
    ];

    for op in [Lock, Unlock, Wait, Notify, NotifyAll, Wake] {
        cases.push(violation(Destroyed, NotHolding, op, V::NotInitialized));
    }
    for op in [Destroy, Lock, Unlock, Wait, Notify, NotifyAll, Wake] {
        cases.push(violation(Uninitialized, NotHolding, op, V::NotInitialized));
    }
    cases
}

#[test]
fn contract_matrix_matches_expected_and_emits_structured_logs() {
    let root = workspace_root();
    let out_dir = root.join("target/conformance");
    fs::create_dir_all(&out_dir).expect("create target/conformance");
    let log_path = out_dir.join("monitor_contract_matrix.log.jsonl");

    let mut log_lines = Vec::new();
    let mut mismatches = Vec::new();
    let cases = matrix_cases();

    for case in &cases {
        let got = monitor_contract_transition(case.state, case.holder, case.op);
        let matches = got.next_state == case.expected_state
            && got.next_holder == case.expected_holder
            && got.violation == case.expected_violation
            && got.blocks == case.expected_blocks;

        if !matches {
            mismatches.push(format!(
                "{}:{}:{} expected(next={}/{}, violation={:?}, blocks={}) got(next={}/{}, violation={:?}, blocks={})",
                state_name(case.state),
                holder_name(case.holder),
                op_name(case.op),
                state_name(case.expected_state),
                holder_name(case.expected_holder),
                case.expected_violation,
                case.expected_blocks,
                state_name(got.next_state),
                holder_name(got.next_holder),
                got.violation,
                got.blocks,
            ));
        }

        log_lines.push(
            serde_json::json!({
                "trace_id": format!(
                    "monitor-contract:{}:{}:{}",
                    state_name(case.state),
                    holder_name(case.holder),
                    op_name(case.op)
                ),
                "operation": op_name(case.op),
                "old_state": state_name(case.state),
                "new_state": state_name(got.next_state),
                "new_holder": holder_name(got.next_holder),
                "violation": got.violation,
                "blocks": got.blocks,
                "status": if matches { "ok" } else { "mismatch" },
            })
            .to_string(),
        );
    }

    fs::write(&log_path, format!("{}\n", log_lines.join("\n"))).expect("write jsonl log");

    assert!(
        mismatches.is_empty(),
        "contract matrix mismatch(es): {mismatches:?}"
    );
}

#[test]
fn matrix_covers_every_initialized_pair() {
    let cases = matrix_cases();
    for holder in [
        HolderState::NotHolding,
        HolderState::Holding,
        HolderState::Waiting,
    ] {
        for op in MonitorOp::ALL {
            assert!(
                cases.iter().any(|case| case.state == MonitorState::Initialized
                    && case.holder == holder
                    && case.op == op),
                "missing Initialized/{}/{}",
                holder_name(holder),
                op_name(op)
            );
        }
    }
}

#[test]
fn every_violation_names_its_operation() {
    let violations: Vec<ContractViolation> = MonitorOp::ALL
        .into_iter()
        .filter_map(|op| {
            monitor_contract_transition(MonitorState::Initialized, HolderState::NotHolding, op)
                .violation
        })
        .collect();
    assert_eq!(
        violations,
        vec![
            ContractViolation::DoubleInit,
            ContractViolation::UnlockWithoutLock,
            ContractViolation::WaitWithoutLock,
            ContractViolation::NotifyWithoutLock,
            ContractViolation::NotifyAllWithoutLock,
            ContractViolation::WaitWithoutLock,
        ]
    );
}
