//! End-to-end hook-pipeline tests: the presentation-layer pattern of gating
//! a render sequence on asynchronous around participants.

#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use axon_events::{Completion, EventCtx, EventEmitter, GateHandler, Handler, Phase, Scheduler};
use serde_json::{json, Value};

fn labelled(log: &Rc<RefCell<Vec<String>>>, label: &str) -> Handler {
    let log = Rc::clone(log);
    let label = label.to_owned();
    Handler::new(move |_: &EventCtx| log.borrow_mut().push(label.clone()))
}

/// A gate completing after a simulated delay, as a remote-fetch hook would.
fn delayed_gate(scheduler: &Scheduler, log: &Rc<RefCell<Vec<String>>>, ms: u64) -> GateHandler {
    let scheduler = scheduler.clone();
    let log = Rc::clone(log);
    GateHandler::new(move |_: &EventCtx, completion: Completion| {
        let log = Rc::clone(&log);
        scheduler.defer_after(Duration::from_millis(ms), move || {
            log.borrow_mut().push(format!("gate:{ms}"));
            completion.complete();
        });
    })
}

#[test]
fn sequence_holds_until_the_slowest_gate_clears() {
    let scheduler = Scheduler::new();
    let emitter = EventEmitter::new(scheduler.clone());
    let order = Rc::new(RefCell::new(Vec::new()));

    emitter.on_phase(Phase::Before, "render", &labelled(&order, "before"));
    emitter.on("render", &labelled(&order, "main"));
    emitter.on_phase(Phase::After, "render", &labelled(&order, "after"));
    emitter.on_around("render", &delayed_gate(&scheduler, &order, 30));
    emitter.on_around("render", &delayed_gate(&scheduler, &order, 10));
    emitter.on_around("render", &delayed_gate(&scheduler, &order, 20));

    emitter.fire_sequence("render", Value::Null, || {});

    assert_eq!(*order.borrow(), vec!["before"], "gated until completion");
    scheduler.advance(Duration::from_millis(20));
    assert_eq!(
        *order.borrow(),
        vec!["before", "gate:10", "gate:20"],
        "early arrivals do not release the gate"
    );
    scheduler.advance(Duration::from_millis(10));
    assert_eq!(
        *order.borrow(),
        vec!["before", "gate:10", "gate:20", "gate:30", "main", "after"],
        "main and after run only at the slowest gate's instant"
    );
}

#[test]
fn sequence_without_gates_still_defers_the_tail() {
    let scheduler = Scheduler::new();
    let emitter = EventEmitter::new(scheduler.clone());
    let order = Rc::new(RefCell::new(Vec::new()));

    emitter.on_phase(Phase::Before, "render", &labelled(&order, "before"));
    emitter.on("render", &labelled(&order, "main"));

    emitter.fire_sequence("render", Value::Null, || {});
    assert_eq!(
        *order.borrow(),
        vec!["before"],
        "the empty gate keeps its asynchronous contract"
    );
    scheduler.run_until_idle();
    assert_eq!(*order.borrow(), vec!["before", "main"]);
}

#[test]
fn payload_reaches_every_phase() {
    let scheduler = Scheduler::new();
    let emitter = EventEmitter::new(scheduler.clone());
    let payloads = Rc::new(RefCell::new(Vec::new()));

    for phase in [Phase::Before, Phase::Main, Phase::After] {
        let log = Rc::clone(&payloads);
        emitter.on_phase(
            phase,
            "navigate",
            &Handler::new(move |ctx: &EventCtx| {
                log.borrow_mut().push((ctx.phase, ctx.payload.clone()));
            }),
        );
    }
    let log = Rc::clone(&payloads);
    emitter.on_around(
        "navigate",
        &GateHandler::new(move |ctx: &EventCtx, completion: Completion| {
            log.borrow_mut().push((ctx.phase, ctx.payload.clone()));
            completion.complete();
        }),
    );

    emitter.fire_sequence("navigate", json!({"path": "/inbox"}), || {});
    scheduler.run_until_idle();

    let payloads = payloads.borrow();
    let phases: Vec<Phase> = payloads.iter().map(|(p, _)| *p).collect();
    assert_eq!(
        phases,
        vec![Phase::Before, Phase::Around, Phase::Main, Phase::After]
    );
    assert!(
        payloads
            .iter()
            .all(|(_, payload)| payload == &json!({"path": "/inbox"})),
        "one payload, every phase"
    );
}

#[test]
fn late_immediate_subscriber_detects_a_finished_boot() {
    let emitter = EventEmitter::new(Scheduler::new());
    // Boot fires before anyone subscribes.
    emitter.fire("boot", Value::Null);

    let seen = Rc::new(RefCell::new(false));
    let log = Rc::clone(&seen);
    emitter.once_immediate("boot", &Handler::new(move |_: &EventCtx| *log.borrow_mut() = true));
    assert!(*seen.borrow(), "late subscriber catches up synchronously");
}
