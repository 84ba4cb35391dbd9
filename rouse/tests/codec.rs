//! Codec identity guarantees: shared substructure and cycles survive a
//! cross-isolation transfer, and non-relocatable values are refused.

use std::rc::Rc;

use rouse::transfer::codec::{decode, encode};
use rouse::transfer::{Function, Value};
use rouse::{DomainId, RouseError, Runtime};

#[test]
fn shared_table_decodes_to_one_aliased_table() {
    let shared = Value::table();
    shared
        .as_table()
        .unwrap()
        .borrow_mut()
        .set(Value::str("n"), Value::Number(5.0));
    let outer = Value::table();
    outer
        .as_table()
        .unwrap()
        .borrow_mut()
        .set(Value::str("a"), shared.clone());
    outer
        .as_table()
        .unwrap()
        .borrow_mut()
        .set(Value::str("b"), shared.clone());

    let decoded = decode(&encode(&[outer]).unwrap()).unwrap();
    let outer = decoded[0].as_table().unwrap().borrow();
    let a = outer.get(&Value::str("a"));
    let b = outer.get(&Value::str("b"));
    assert!(Rc::ptr_eq(a.as_table().unwrap(), b.as_table().unwrap()));
    assert_eq!(
        a.as_table().unwrap().borrow().get(&Value::str("n")),
        Value::Number(5.0)
    );
}

#[test]
fn self_referential_table_survives_the_round_trip() {
    let cyclic = Value::table();
    cyclic
        .as_table()
        .unwrap()
        .borrow_mut()
        .set(Value::str("me"), cyclic.clone());

    let decoded = decode(&encode(&[cyclic]).unwrap()).unwrap();
    let table = decoded[0].as_table().unwrap();
    let inner = table.borrow().get(&Value::str("me"));
    assert!(Rc::ptr_eq(table, inner.as_table().unwrap()));
}

#[test]
fn function_upvalues_keep_sharing_with_their_environment() {
    let env = Value::table();
    let func = Function::new(b"chunk-bytes".to_vec(), vec![env.clone(), env.clone()]);

    let decoded = decode(&encode(&[func, env]).unwrap()).unwrap();
    let (func, env) = (&decoded[0], &decoded[1]);
    let Value::Function(func) = func else {
        panic!("expected a function")
    };
    assert_eq!(func.chunk, b"chunk-bytes");
    let upvalues = func.upvalues.borrow();
    assert!(Rc::ptr_eq(
        upvalues[0].as_table().unwrap(),
        env.as_table().unwrap()
    ));
    assert!(Rc::ptr_eq(
        upvalues[0].as_table().unwrap(),
        upvalues[1].as_table().unwrap()
    ));
}

#[test]
fn mutating_a_decoded_copy_leaves_the_original_alone() {
    let original = Value::table();
    original
        .as_table()
        .unwrap()
        .borrow_mut()
        .set(Value::str("k"), Value::Number(1.0));

    let decoded = decode(&encode(&[original.clone()]).unwrap()).unwrap();
    decoded[0]
        .as_table()
        .unwrap()
        .borrow_mut()
        .set(Value::str("k"), Value::Number(2.0));

    assert_eq!(
        original.as_table().unwrap().borrow().get(&Value::str("k")),
        Value::Number(1.0)
    );
}

#[test]
fn cross_domain_rouse_delivers_an_isolated_deep_copy() {
    let runtime = Runtime::new();
    let condition = runtime.reactor().new_condition_in(DomainId(1));

    let payload = Value::table();
    payload
        .as_table()
        .unwrap()
        .borrow_mut()
        .set(Value::str("k"), Value::str("v"));
    condition.rouse(vec![payload.clone()]).unwrap();

    // The awaiting context is in the root domain; crossing out of domain 1
    // goes through the codec.
    let values = runtime.block_on(condition.await_signal()).unwrap();
    let delivered = values[0].as_table().unwrap();
    assert!(!Rc::ptr_eq(delivered, payload.as_table().unwrap()));
    assert_eq!(
        delivered.borrow().get(&Value::str("k")),
        Value::str("v")
    );
}

#[test]
fn actor_handles_refuse_to_cross_domains() {
    let runtime = Runtime::new();
    let condition = runtime.reactor().new_condition_in(DomainId(1));

    condition.rouse(vec![Value::Handle(condition.id())]).unwrap();
    let err = runtime.block_on(condition.await_signal()).unwrap_err();
    assert!(matches!(err, RouseError::Encoding(_)));
}
