use super::*;

use lvm::{instr, Address, BaseRegister, Instruction, Opcode, Word};
use lvmx::Program;

fn compile_source(source: &str) -> Result<Program> {
    translate(source, DATA_CAPACITY, TEXT_CAPACITY)
}

fn opcodes(program: &Program) -> Vec<Opcode> {
    program.code().iter().map(|i| i.opcode).collect()
}

/// The emitted instructions with their debug annotations cleared, for
/// comparison against expected sequences.
fn stripped(program: &Program) -> Vec<Instruction> {
    program
        .code()
        .iter()
        .map(|i| Instruction {
            opcode: i.opcode,
            address: i.address,
            debug: None,
        })
        .collect()
}

fn position_of(program: &Program, debug: &str) -> usize {
    program
        .code()
        .iter()
        .position(|i| i.debug.as_deref() == Some(debug))
        .unwrap()
}

#[test]
fn number_literal_program() {
    let program = compile_source("42").unwrap();
    assert_eq!(
        stripped(&program),
        vec![
            instr!(NOP),
            instr!(LD, abs(0)),
            instr!(PUSH),
            instr!(ST, rel(SP, 1)),
            instr!(POP),
            instr!(HALT),
        ]
    );
    assert_eq!(program.data(), &[42]);
}

#[test]
fn character_literal_folds_to_its_code() {
    let program = compile_source("'A'").unwrap();
    assert_eq!(program.data(), &[65]);
}

#[test]
fn string_literal_is_length_prefixed_with_an_indirection_slot() {
    let program = compile_source("\"hi\"").unwrap();
    assert_eq!(program.data(), &[2, 104, 105, 0]);
    // The load goes through the indirection slot at address 3.
    assert_eq!(stripped(&program)[1], instr!(LD, abs(3)));
}

#[test]
fn arithmetic_emission() {
    let program = compile_source("(+ 1 2)").unwrap();
    assert_eq!(
        stripped(&program),
        vec![
            instr!(NOP),
            instr!(LD, abs(0)),
            instr!(PUSH),
            instr!(ST, rel(SP, 1)),
            instr!(LD, abs(1)),
            instr!(PUSH),
            instr!(ST, rel(SP, 1)),
            instr!(LD, rel(SP, 2)),
            instr!(ADD, rel(SP, 1)),
            instr!(POP),
            instr!(ST, rel(SP, 1)),
            instr!(POP),
            instr!(HALT),
        ]
    );
    assert_eq!(program.data(), &[1, 2]);
}

#[test]
fn comparison_subtracts_and_takes_the_sign() {
    let program = compile_source("(< 1 2)").unwrap();
    let code = stripped(&program);
    let sub = code
        .iter()
        .position(|i| i.opcode == Opcode::SUB)
        .unwrap();
    assert_eq!(code[sub], instr!(SUB, rel(SP, 1)));
    assert_eq!(code[sub + 1], instr!(ISNEG));
}

#[test]
fn unary_not_acts_through_the_accumulator() {
    let program = compile_source("(not 1)").unwrap();
    let not = program
        .code()
        .iter()
        .find(|i| i.opcode == Opcode::NOT)
        .unwrap();
    assert_eq!(not.address, None);
}

#[test]
fn assignment_allocates_a_root_variable() {
    let program = compile_source("(setq x 5)").unwrap();
    // Cell 0 is x, cell 1 the literal.
    assert_eq!(program.data(), &[0, 5]);
    assert!(stripped(&program).contains(&instr!(ST, abs(0))));
}

#[test]
fn assignment_value_stays_on_the_stack() {
    let program = compile_source("(setq x 5)").unwrap();
    let code = stripped(&program);
    let st = code.iter().position(|i| *i == instr!(ST, abs(0))).unwrap();
    // The store is preceded by the top-of-stack load and followed only by
    // the sequencer's pop.
    assert_eq!(code[st - 1], instr!(LD, rel(SP, 1)));
    assert_eq!(code[st + 1], instr!(POP));
}

#[test]
fn allocation_puts_the_buffer_address_on_the_stack() {
    let program = compile_source("(alloc 4)").unwrap();
    // Four buffer words, then the indirection slot holding address 0.
    assert_eq!(program.data(), &[0, 0, 0, 0, 0]);
    assert_eq!(
        stripped(&program)[1..4],
        [instr!(PUSH), instr!(LD, abs(4)), instr!(ST, rel(SP, 1))]
    );
}

#[test]
fn loop_emission_patches_the_exit_jump() {
    let program = compile_source("(loop 0 1)").unwrap();
    assert_eq!(
        stripped(&program),
        vec![
            instr!(NOP),            // program start
            instr!(NOP),            // loop start
            instr!(LD, abs(0)),     // condition
            instr!(PUSH),
            instr!(ST, rel(SP, 1)),
            instr!(LD, rel(SP, 1)), // condition into the accumulator
            instr!(JZ, flow(13)),   // out of the loop
            instr!(POP),            // condition slot
            instr!(LD, abs(1)),     // body
            instr!(PUSH),
            instr!(ST, rel(SP, 1)),
            instr!(POP),
            instr!(JMP, flow(1)),   // back to the top
            instr!(NOP),            // loop after
            instr!(POP),            // sequencer
            instr!(HALT),
        ]
    );
}

#[test]
fn conditional_emission_patches_both_jumps() {
    let program = compile_source("(if 1 2 3)").unwrap();
    assert_eq!(
        stripped(&program),
        vec![
            instr!(NOP),            // program start
            instr!(LD, abs(0)),     // condition
            instr!(PUSH),
            instr!(ST, rel(SP, 1)),
            instr!(LD, rel(SP, 1)),
            instr!(JZ, flow(10)),   // to the false label
            instr!(LD, abs(1)),     // true branch
            instr!(PUSH),
            instr!(ST, rel(SP, 1)),
            instr!(JMP, flow(14)),  // to the merge store
            instr!(NOP),            // false label
            instr!(LD, abs(2)),     // false branch
            instr!(PUSH),
            instr!(ST, rel(SP, 1)),
            instr!(ST, rel(SP, 2)), // merge: branch value into the result slot
            instr!(POP),
            instr!(POP),            // sequencer
            instr!(HALT),
        ]
    );
}

#[test]
fn call_links_to_the_function_entry() {
    let program = compile_source("(defun f (a) a) (f 7)").unwrap();
    let entry = position_of(&program, "function [f]");
    let call = program
        .code()
        .iter()
        .find(|i| i.opcode == Opcode::CALL)
        .unwrap();
    assert_eq!(
        call.address,
        Some(Address::ControlFlow {
            value: entry as Word
        })
    );
}

#[test]
fn parameters_address_the_frame_above_the_return_address() {
    let program = compile_source("(defun snd (a b) b) (snd 1 2)").unwrap();
    let entry = position_of(&program, "function [snd]");
    // Body reads b, the second of two parameters: fp + (2 + 2 - 1).
    assert_eq!(
        program.code()[entry + 1].address,
        Some(Address::Relative {
            offset: 3,
            register: BaseRegister::FP
        })
    );
}

#[test]
fn locals_address_the_frame_at_non_positive_offsets() {
    let program = compile_source("(defun f () (setq a 1) (setq b 2) b) (f)").unwrap();
    let code = &program.code()[position_of(&program, "function [f]")..];
    let stores: Vec<Address> = code
        .iter()
        .filter(|i| i.opcode == Opcode::ST)
        .filter_map(|i| i.address)
        .filter(|a| match a {
            Address::Relative {
                register: BaseRegister::FP,
                ..
            } => true,
            _ => false,
        })
        .collect();
    assert_eq!(
        stores,
        vec![
            Address::Relative {
                offset: 0,
                register: BaseRegister::FP
            },
            Address::Relative {
                offset: -1,
                register: BaseRegister::FP
            },
        ]
    );
}

#[test]
fn empty_function_body_gets_a_result_placeholder() {
    let program = compile_source("(defun f ()) (f)").unwrap();
    let entry = position_of(&program, "function [f]");
    assert_eq!(
        stripped(&program)[entry..entry + 5],
        [
            instr!(NOP),
            instr!(PUSH),
            instr!(LD, rel(SP, 1)),
            instr!(POP),
            instr!(RET),
        ]
    );
}

#[test]
fn function_definition_is_replaced_by_zero() {
    let program = compile_source("(defun f () 1)").unwrap();
    // No call anywhere: the definition compiles as the literal 0 and the
    // function itself is not emitted.
    assert_eq!(program.data(), &[0]);
    assert!(!opcodes(&program).contains(&Opcode::RET));
}

#[test]
fn unreachable_functions_are_not_emitted() {
    let program = compile_source("(defun dead () 1) (defun live () 2) (live)").unwrap();
    let code = program.code();
    assert!(code
        .iter()
        .any(|i| i.debug.as_deref() == Some("function [live]")));
    assert!(!code
        .iter()
        .any(|i| i.debug.as_deref() == Some("function [dead]")));
}

#[test]
fn reachability_follows_call_chains() {
    let program = compile_source("(defun a () (b)) (defun b () 2) (a)").unwrap();
    let rets = opcodes(&program)
        .iter()
        .filter(|o| **o == Opcode::RET)
        .count();
    assert_eq!(rets, 2);
}

#[test]
fn root_variables_are_readable_from_functions() {
    let program = compile_source("(setq g 5) (defun f () g) (put (f))").unwrap();
    let entry = position_of(&program, "function [f]");
    // g resolves to its absolute root cell, not a frame offset.
    assert_eq!(
        program.code()[entry + 1].address,
        Some(Address::Absolute { value: 0 })
    );
}

#[test]
fn read_before_first_assignment_is_an_error() {
    let err = compile_source("x (setq x 1)").unwrap_err();
    assert!(err.to_string().contains("unknown variable symbol [x]"));
}

#[test]
fn unknown_function_is_an_error() {
    let err = compile_source("(foo 1)").unwrap_err();
    assert!(err.to_string().contains("unknown function symbol [foo]"));
}

#[test]
fn duplicate_function_definition_is_an_error() {
    let err = compile_source("(defun f () 1) (defun f () 2) (f)").unwrap_err();
    assert!(err.to_string().contains("duplicate function definition"));
}

#[test]
fn arity_mismatch_is_an_error() {
    let err = compile_source("(defun f (a) a) (f 1 2)").unwrap_err();
    assert!(err.to_string().contains("expects 1 arguments, got 2"));
}

#[test]
fn data_capacity_overflow_is_an_error() {
    let err = translate("(setq a 1)", 1, TEXT_CAPACITY).unwrap_err();
    assert!(err.to_string().contains("data memory capacity exceeded"));
}

#[test]
fn text_capacity_overflow_is_an_error() {
    let err = translate("42", 16, 3).unwrap_err();
    assert!(err
        .to_string()
        .contains("instruction memory capacity exceeded"));
}

#[test]
fn errors_carry_the_source_position() {
    let err = compile_source("(put\n  unbound)").unwrap_err();
    let rendered = err.to_string();
    assert!(rendered.contains("2:3"), "{}", rendered);
}

#[test]
fn parses_operators_and_comments() {
    let root = parse("(put 'A') ; trailing comment\n(setq x (get))").unwrap();
    let expressions = match root {
        Expression::Root { expressions } => expressions,
        _ => unreachable!(),
    };
    assert_eq!(expressions.len(), 2);
    match &expressions[0] {
        Expression::UnaryOperation {
            operator, operand, ..
        } => {
            assert_eq!(*operator, UnaryOperator::Put);
            match &**operand {
                Expression::Number { value, .. } => assert_eq!(*value, 65),
                _ => panic!("character literal did not fold"),
            }
        }
        other => panic!("unexpected expression {:?}", other),
    }
}

#[test]
fn malformed_programs_are_rejected() {
    let sources = [
        "(2)",
        "(+)",
        "(+ 1)",
        "(+ 1 2 3)",
        "(not)",
        "(not 1 2)",
        "(get 1)",
        "(loop)",
        "(if)",
        "(if 1)",
        "(if 1 2)",
        "(alloc)",
        "(alloc str)",
        "(alloc (f))",
        "(setq)",
        "(setq x)",
        "defun",
        "(defun",
        "(defun)",
        "(defun f",
        "(foo 1 2",
        "'a\"",
        "\"hello",
        "%",
        "(setq loop 1)",
    ];
    for source in &sources {
        assert!(
            compile_source(source).is_err(),
            "{:?} should have been rejected",
            source
        );
    }
}

#[test]
fn identifiers_may_contain_dashes() {
    assert!(compile_source("(defun print-str (a) a) (print-str 1)").is_ok());
}
