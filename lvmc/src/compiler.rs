//! Lowers the expression tree into a linked program.
//!
//! Compilation runs in five steps: function extraction, reachability,
//! variable resolution, emission and linking. Emission keeps the virtual
//! stack balanced by construction: every expression nets exactly one
//! pushed word (its value) and leaves the same value in the accumulator;
//! the statement sequencers pop it.

use std::collections::HashMap;

use log::debug;
use pest::Span;

use lvm::{instr, Address, BaseRegister, Instruction, Opcode, Word};
use lvmx::Program;

use crate::ast::{BinaryOperator, Expression, NullaryOperator, UnaryOperator};
use crate::segment::{DataSegment, TextEntry, TextSegment};
use crate::{new_parser_error, Result};

/// A function definition lifted out of the tree.
struct Function<'i> {
    span: Span<'i>,
    name: &'i str,
    parameters: Vec<&'i str>,
    body: Vec<Expression<'i>>,
}

/// Name → address bindings of one scope. `outer` holds the root bindings
/// visible from inside a function body; shadowing resolves local-first.
struct Scope<'i> {
    local: Vec<(&'i str, Address)>,
    outer: Vec<(&'i str, Address)>,
}

impl<'i> Scope<'i> {
    fn lookup(&self, name: &str) -> Option<Address> {
        self.local
            .iter()
            .chain(self.outer.iter())
            .find(|(bound, _)| *bound == name)
            .map(|(_, address)| *address)
    }
}

fn data_overflow(span: Span) -> crate::Error {
    new_parser_error(span, "data memory capacity exceeded".to_owned())
}

fn text_overflow(span: Span) -> crate::Error {
    new_parser_error(span, "instruction memory capacity exceeded".to_owned())
}

fn resolve<'i>(scope: &Scope<'i>, name: &str, span: Span<'i>) -> Result<Address> {
    scope
        .lookup(name)
        .ok_or_else(|| new_parser_error(span, format!("unknown variable symbol [{}]", name)))
}

fn arithmetic_opcode(operator: BinaryOperator) -> Opcode {
    match operator {
        BinaryOperator::Add => Opcode::ADD,
        BinaryOperator::Sub => Opcode::SUB,
        BinaryOperator::And => Opcode::AND,
        BinaryOperator::Or => Opcode::OR,
        _ => unreachable!(),
    }
}

/// Comparisons subtract and then turn the sign into 0/1.
fn comparison_opcode(operator: BinaryOperator) -> Opcode {
    match operator {
        BinaryOperator::Equals => Opcode::ISZERO,
        BinaryOperator::Less => Opcode::ISNEG,
        BinaryOperator::Greater => Opcode::ISPOS,
        _ => unreachable!(),
    }
}

/// Translates a parsed program into a linked instruction and data image.
pub fn compile<'i>(
    input: &'i str,
    root: Expression<'i>,
    data_capacity: usize,
    text_capacity: usize,
) -> Result<Program> {
    let mut expressions = match root {
        Expression::Root { expressions } => expressions,
        _ => unreachable!(),
    };

    let functions = extract_functions(&mut expressions)?;
    let reachable = reachable_functions(&expressions, &functions)?;
    debug!(
        "functions: {} defined, {} reachable",
        functions.len(),
        reachable.len()
    );

    let program_span = Span::new(input, 0, 0).unwrap();

    let mut emitter = Emitter {
        data: DataSegment::new(data_capacity),
        text: TextSegment::new(text_capacity),
        symbols: HashMap::new(),
        arities: functions
            .iter()
            .map(|function| (function.name, function.parameters.len()))
            .collect(),
    };

    // Root scope: one data word per assigned name, in encounter order.
    let mut root_scope = Scope {
        local: Vec::new(),
        outer: Vec::new(),
    };
    for (name, span) in collect_variables(&expressions, &[], &[])? {
        let address = emitter.data.put_word(0).map_err(|_| data_overflow(span))?;
        root_scope.local.push((
            name,
            Address::Absolute {
                value: address as Word,
            },
        ));
    }

    emitter.compile_root(program_span, &expressions, &root_scope)?;

    let root_visible: Vec<&str> = root_scope.local.iter().map(|(name, _)| *name).collect();
    for &index in &reachable {
        let function = &functions[index];
        let locals = collect_variables(&function.body, &function.parameters, &root_visible)?;
        let locals_count = locals.len();

        let mut scope = Scope {
            local: Vec::new(),
            outer: root_scope.local.clone(),
        };
        let count = function.parameters.len();
        for (i, name) in function.parameters.iter().enumerate() {
            scope.local.push((
                *name,
                Address::Relative {
                    offset: (2 + count - i) as Word,
                    register: BaseRegister::FP,
                },
            ));
        }
        for (i, (name, _)) in locals.into_iter().enumerate() {
            scope.local.push((
                name,
                Address::Relative {
                    offset: -(i as Word),
                    register: BaseRegister::FP,
                },
            ));
        }

        emitter.compile_function(function, &scope, locals_count)?;
    }

    let data = emitter.data.into_words();
    let symbols = emitter.symbols;
    let code = link(emitter.text, &symbols)?;
    debug!(
        "emitted {} instructions, {} data words",
        code.len(),
        data.len()
    );
    Ok(Program::new(code, data))
}

/// Step A: moves every function definition into a table, leaving the
/// number literal 0 in its place. Definitions nested inside lifted bodies
/// are lifted as well. Duplicate names are a failure.
fn extract_functions<'i>(expressions: &mut Vec<Expression<'i>>) -> Result<Vec<Function<'i>>> {
    let mut functions: Vec<Function<'i>> = Vec::new();
    let mut duplicate: Option<(&'i str, Span<'i>)> = None;

    fn lift<'i>(
        expression: Expression<'i>,
        functions: &mut Vec<Function<'i>>,
        duplicate: &mut Option<(&'i str, Span<'i>)>,
    ) -> Expression<'i> {
        match expression {
            Expression::FunctionDefinition {
                span,
                name,
                parameters,
                body,
            } => {
                if functions.iter().any(|function| function.name == name) {
                    if duplicate.is_none() {
                        *duplicate = Some((name, span));
                    }
                } else {
                    functions.push(Function {
                        span,
                        name,
                        parameters,
                        body,
                    });
                }
                Expression::Number { span, value: 0 }
            }
            other => other,
        }
    }

    fn lift_all<'i>(
        expressions: &mut Vec<Expression<'i>>,
        functions: &mut Vec<Function<'i>>,
        duplicate: &mut Option<(&'i str, Span<'i>)>,
    ) {
        for slot in expressions.iter_mut() {
            let old = std::mem::replace(slot, Expression::Empty);
            *slot = lift(old, functions, duplicate);
            slot.apply_traverse(&mut |e| lift(e, functions, duplicate));
        }
    }

    lift_all(expressions, &mut functions, &mut duplicate);
    let mut index = 0;
    while index < functions.len() {
        let mut body = std::mem::replace(&mut functions[index].body, Vec::new());
        lift_all(&mut body, &mut functions, &mut duplicate);
        functions[index].body = body;
        index += 1;
    }

    if let Some((name, span)) = duplicate {
        return Err(new_parser_error(
            span,
            format!("duplicate function definition [{}]", name),
        ));
    }
    Ok(functions)
}

fn note_calls<'i>(expression: &Expression<'i>, out: &mut Vec<(&'i str, Span<'i>)>) {
    let mut look = |e: &Expression<'i>| {
        if let Expression::FunctionCall { span, name, .. } = e {
            out.push((*name, *span));
        }
    };
    look(expression);
    expression.visit(&mut look);
}

/// Step B: transitive closure of callees starting from the root. Returns
/// indices in definition order; a call to an undefined name is a failure.
fn reachable_functions<'i>(
    expressions: &[Expression<'i>],
    functions: &[Function<'i>],
) -> Result<Vec<usize>> {
    let mut pending: Vec<(&'i str, Span<'i>)> = Vec::new();
    for expression in expressions {
        note_calls(expression, &mut pending);
    }

    let mut reached = vec![false; functions.len()];
    while let Some((name, span)) = pending.pop() {
        let index = functions
            .iter()
            .position(|function| function.name == name)
            .ok_or_else(|| {
                new_parser_error(span, format!("unknown function symbol [{}]", name))
            })?;
        if !reached[index] {
            reached[index] = true;
            for expression in &functions[index].body {
                note_calls(expression, &mut pending);
            }
        }
    }

    Ok((0..functions.len()).filter(|i| reached[*i]).collect())
}

/// Step C: assigned names of a scope in encounter order. `context` holds
/// the parameters, `outer` the names readable from the enclosing root
/// scope. A value read that resolves nowhere is a failure.
fn collect_variables<'i>(
    expressions: &[Expression<'i>],
    context: &[&'i str],
    outer: &[&'i str],
) -> Result<Vec<(&'i str, Span<'i>)>> {
    let mut variables: Vec<(&'i str, Span<'i>)> = Vec::new();
    let mut unknown: Option<(&'i str, Span<'i>)> = None;

    {
        let mut inspect = |e: &Expression<'i>| match e {
            Expression::Assignment { span, name, .. } => {
                if !context.contains(name) && variables.iter().all(|(bound, _)| bound != name) {
                    variables.push((*name, *span));
                }
            }
            Expression::Variable { span, name } => {
                if unknown.is_none()
                    && !context.contains(name)
                    && variables.iter().all(|(bound, _)| bound != name)
                    && !outer.contains(name)
                {
                    unknown = Some((*name, *span));
                }
            }
            _ => {}
        };
        for expression in expressions {
            inspect(expression);
        }
        for expression in expressions {
            expression.visit(&mut inspect);
        }
    }

    if let Some((name, span)) = unknown {
        return Err(new_parser_error(
            span,
            format!("unknown variable symbol [{}]", name),
        ));
    }
    Ok(variables)
}

/// Step D and E state: the two segments, the symbol table filled in by
/// function emission, and the arity table used to check calls.
struct Emitter<'i> {
    data: DataSegment,
    text: TextSegment<'i>,
    symbols: HashMap<&'i str, usize>,
    arities: HashMap<&'i str, usize>,
}

impl<'i> Emitter<'i> {
    fn emit(&mut self, span: Span<'i>, instruction: Instruction) -> Result<usize> {
        self.text.write(instruction).map_err(|_| text_overflow(span))
    }

    fn nop<S: Into<String>>(&mut self, span: Span<'i>, debug: S) -> Result<usize> {
        self.text.write_nop(debug).map_err(|_| text_overflow(span))
    }

    fn pop(&mut self, span: Span<'i>) -> Result<usize> {
        self.text.write_pop().map_err(|_| text_overflow(span))
    }

    fn stack_load(&mut self, span: Span<'i>) -> Result<usize> {
        self.text.write_stack_load().map_err(|_| text_overflow(span))
    }

    fn accumulator_push(&mut self, span: Span<'i>) -> Result<usize> {
        self.text
            .write_accumulator_push()
            .map_err(|_| text_overflow(span))
    }

    fn compile_root(
        &mut self,
        span: Span<'i>,
        expressions: &[Expression<'i>],
        scope: &Scope<'i>,
    ) -> Result<()> {
        self.nop(span, "program start")?;
        for expression in expressions {
            self.compile_expression(expression, scope)?;
            self.pop(expression.span().unwrap_or(span))?;
        }
        self.emit(span, instr!(HALT).describe("program end"))?;
        Ok(())
    }

    fn compile_function(
        &mut self,
        function: &Function<'i>,
        scope: &Scope<'i>,
        locals_count: usize,
    ) -> Result<()> {
        let span = function.span;
        let address = self.nop(span, format!("function [{}]", function.name))?;
        self.symbols.insert(function.name, address);

        for i in 0..locals_count {
            self.emit(
                span,
                instr!(PUSH).describe(format!("allocate local variable [{}]", i)),
            )?;
        }
        if function.body.is_empty() {
            self.emit(span, instr!(PUSH).describe("result placeholder"))?;
        }
        for (i, expression) in function.body.iter().enumerate() {
            self.compile_expression(expression, scope)?;
            if i + 1 != function.body.len() {
                self.pop(expression.span().unwrap_or(span))?;
            }
        }

        self.emit(span, instr!(LD, rel(SP, 1)).describe("save result"))?;
        self.emit(span, instr!(POP).describe("clear result"))?;
        for i in 0..locals_count {
            self.emit(
                span,
                instr!(POP).describe(format!("clear local variable [{}]", i)),
            )?;
        }
        self.emit(span, instr!(RET))?;
        Ok(())
    }

    fn compile_expression(
        &mut self,
        expression: &Expression<'i>,
        scope: &Scope<'i>,
    ) -> Result<()> {
        match expression {
            Expression::Number { span, value } => self.compile_number(*span, *value),
            Expression::StringLiteral { span, value } => self.compile_string(*span, value),
            Expression::Variable { span, name } => self.compile_variable(*span, name, scope),
            Expression::Assignment { span, name, value } => {
                self.compile_assignment(*span, name, value, scope)
            }
            Expression::FunctionCall {
                span,
                name,
                arguments,
            } => self.compile_call(*span, *name, arguments, scope),
            Expression::BinaryOperation {
                span,
                operator,
                first,
                second,
            } => self.compile_binary(*span, *operator, first, second, scope),
            Expression::UnaryOperation {
                span,
                operator,
                operand,
            } => self.compile_unary(*span, *operator, operand, scope),
            Expression::NullaryOperation { span, operator } => {
                self.compile_nullary(*span, *operator)
            }
            Expression::Loop {
                span,
                condition,
                body,
            } => self.compile_loop(*span, condition, body, scope),
            Expression::Conditional {
                span,
                condition,
                true_branch,
                false_branch,
            } => self.compile_conditional(*span, condition, true_branch, false_branch, scope),
            Expression::Allocation { span, size } => self.compile_allocation(*span, *size),
            Expression::Empty => Ok(()),
            Expression::Root { .. } | Expression::FunctionDefinition { .. } => unreachable!(),
        }
    }

    fn compile_number(&mut self, span: Span<'i>, value: Word) -> Result<()> {
        let slot = self.data.put_word(value).map_err(|_| data_overflow(span))?;
        self.emit(
            span,
            instr!(LD, abs(slot as Word)).describe(format!("number literal [{}]", value)),
        )?;
        self.accumulator_push(span)?;
        Ok(())
    }

    /// The string body goes into data; the expression's value is the
    /// address of the length word, delivered through an indirection slot.
    fn compile_string(&mut self, span: Span<'i>, value: &str) -> Result<()> {
        let address = self
            .data
            .put_string(value)
            .map_err(|_| data_overflow(span))?;
        let slot = self
            .data
            .put_word(address as Word)
            .map_err(|_| data_overflow(span))?;
        self.emit(
            span,
            instr!(LD, abs(slot as Word)).describe(format!("string literal [{}]", value)),
        )?;
        self.accumulator_push(span)?;
        Ok(())
    }

    fn compile_variable(&mut self, span: Span<'i>, name: &str, scope: &Scope<'i>) -> Result<()> {
        let address = resolve(scope, name, span)?;
        self.emit(
            span,
            Instruction::with_address(Opcode::LD, address)
                .describe(format!("variable value [{}]", name)),
        )?;
        self.accumulator_push(span)?;
        Ok(())
    }

    /// The assigned value stays on top of the stack as the expression's
    /// own value.
    fn compile_assignment(
        &mut self,
        span: Span<'i>,
        name: &str,
        value: &Expression<'i>,
        scope: &Scope<'i>,
    ) -> Result<()> {
        let address = resolve(scope, name, span)?;
        self.compile_expression(value, scope)?;
        self.stack_load(span)?;
        self.emit(span, Instruction::with_address(Opcode::ST, address))?;
        Ok(())
    }

    /// The buffer itself lives in data; the pushed word receives its
    /// address through an indirection slot.
    fn compile_allocation(&mut self, span: Span<'i>, size: usize) -> Result<()> {
        let buffer = self.data.allocate(size).map_err(|_| data_overflow(span))?;
        let slot = self
            .data
            .put_word(buffer as Word)
            .map_err(|_| data_overflow(span))?;
        self.emit(
            span,
            instr!(PUSH).describe(format!("allocation of size [{}]", size)),
        )?;
        self.emit(span, instr!(LD, abs(slot as Word)))?;
        self.emit(span, instr!(ST, rel(SP, 1)))?;
        Ok(())
    }

    fn compile_call(
        &mut self,
        span: Span<'i>,
        name: &'i str,
        arguments: &[Expression<'i>],
        scope: &Scope<'i>,
    ) -> Result<()> {
        let arity = *self.arities.get(name).ok_or_else(|| {
            new_parser_error(span, format!("unknown function symbol [{}]", name))
        })?;
        if arguments.len() != arity {
            return Err(new_parser_error(
                span,
                format!(
                    "function [{}] expects {} arguments, got {}",
                    name,
                    arity,
                    arguments.len()
                ),
            ));
        }
        for argument in arguments {
            self.compile_expression(argument, scope)?;
        }
        self.text
            .write_call(name, span, format!("function call [{}]", name))
            .map_err(|_| text_overflow(span))?;
        for _ in arguments {
            self.emit(span, instr!(POP).describe("clear argument"))?;
        }
        // The return value arrives in the accumulator.
        self.accumulator_push(span)?;
        Ok(())
    }

    fn compile_binary(
        &mut self,
        span: Span<'i>,
        operator: BinaryOperator,
        first: &Expression<'i>,
        second: &Expression<'i>,
        scope: &Scope<'i>,
    ) -> Result<()> {
        match operator {
            BinaryOperator::Store => self.compile_store(span, first, second, scope),
            BinaryOperator::Equals | BinaryOperator::Less | BinaryOperator::Greater => {
                self.compile_comparison(span, operator, first, second, scope)
            }
            _ => self.compile_arithmetic(span, operator, first, second, scope),
        }
    }

    /// Both operands are on the stack; the ALU consumes them and the
    /// result replaces them in the remaining slot.
    fn compile_arithmetic(
        &mut self,
        span: Span<'i>,
        operator: BinaryOperator,
        first: &Expression<'i>,
        second: &Expression<'i>,
        scope: &Scope<'i>,
    ) -> Result<()> {
        self.compile_expression(first, scope)?;
        self.compile_expression(second, scope)?;
        self.emit(
            span,
            instr!(LD, rel(SP, 2)).describe(format!("binary operation [{}]", operator.symbol())),
        )?;
        self.emit(
            span,
            Instruction::with_address(
                arithmetic_opcode(operator),
                Address::Relative {
                    offset: 1,
                    register: BaseRegister::SP,
                },
            ),
        )?;
        self.pop(span)?;
        self.emit(span, instr!(ST, rel(SP, 1)))?;
        Ok(())
    }

    fn compile_comparison(
        &mut self,
        span: Span<'i>,
        operator: BinaryOperator,
        first: &Expression<'i>,
        second: &Expression<'i>,
        scope: &Scope<'i>,
    ) -> Result<()> {
        self.compile_expression(first, scope)?;
        self.compile_expression(second, scope)?;
        self.emit(
            span,
            instr!(LD, rel(SP, 2)).describe(format!("binary operation [{}]", operator.symbol())),
        )?;
        self.emit(span, instr!(SUB, rel(SP, 1)))?;
        self.emit(span, Instruction::plain(comparison_opcode(operator)))?;
        self.pop(span)?;
        self.emit(span, instr!(ST, rel(SP, 1)))?;
        Ok(())
    }

    /// `store` writes through the address below the value and leaves the
    /// stored value on top as the expression's result.
    fn compile_store(
        &mut self,
        span: Span<'i>,
        first: &Expression<'i>,
        second: &Expression<'i>,
        scope: &Scope<'i>,
    ) -> Result<()> {
        self.compile_expression(first, scope)?;
        self.compile_expression(second, scope)?;
        self.emit(
            span,
            instr!(LD, rel(SP, 1)).describe("binary operation [store]"),
        )?;
        self.emit(span, instr!(ST, ind(SP, 2)))?;
        self.pop(span)?;
        self.emit(span, instr!(ST, rel(SP, 1)))?;
        Ok(())
    }

    /// Unaries act through the accumulator, which already holds the
    /// operand's value; the result is stored back into the top slot.
    fn compile_unary(
        &mut self,
        span: Span<'i>,
        operator: UnaryOperator,
        operand: &Expression<'i>,
        scope: &Scope<'i>,
    ) -> Result<()> {
        self.compile_expression(operand, scope)?;
        let debug = format!("unary operation [{}]", operator.symbol());
        match operator {
            UnaryOperator::Not => {
                self.emit(span, instr!(NOT).describe(debug))?;
            }
            UnaryOperator::Put => {
                self.emit(span, instr!(PUT).describe(debug))?;
            }
            UnaryOperator::Load => {
                self.emit(span, instr!(LD, ind(SP, 1)).describe(debug))?;
            }
        }
        self.emit(span, instr!(ST, rel(SP, 1)))?;
        Ok(())
    }

    fn compile_nullary(&mut self, span: Span<'i>, operator: NullaryOperator) -> Result<()> {
        match operator {
            NullaryOperator::Get => {
                self.emit(span, instr!(GET).describe("nullary operation [get]"))?;
            }
        }
        self.accumulator_push(span)?;
        Ok(())
    }

    /// The condition value is popped before the body runs on every pass;
    /// the value left behind at the exit (always 0) is the loop's own
    /// value.
    fn compile_loop(
        &mut self,
        span: Span<'i>,
        condition: &Expression<'i>,
        body: &[Expression<'i>],
        scope: &Scope<'i>,
    ) -> Result<()> {
        let top = self.nop(span, "loop start")?;
        self.compile_expression(condition, scope)?;
        self.stack_load(span)?;
        let exit = self.emit(span, instr!(JZ).describe("jump out of loop"))?;
        self.pop(span)?;
        for expression in body {
            self.compile_expression(expression, scope)?;
            self.pop(expression.span().unwrap_or(span))?;
        }
        self.emit(
            span,
            instr!(JMP, flow(top as Word)).describe("jump loop begin"),
        )?;
        let bottom = self.nop(span, "loop after")?;
        self.text.patch_jump(exit, bottom);
        Ok(())
    }

    /// Exactly one branch runs; the merge point stores the accumulator
    /// into the condition's slot, which becomes the result slot.
    fn compile_conditional(
        &mut self,
        span: Span<'i>,
        condition: &Expression<'i>,
        true_branch: &Expression<'i>,
        false_branch: &Expression<'i>,
        scope: &Scope<'i>,
    ) -> Result<()> {
        self.compile_expression(condition, scope)?;
        self.stack_load(span)?;
        let false_jump = self.emit(span, instr!(JZ).describe("jump if false"))?;
        self.compile_expression(true_branch, scope)?;
        let exit_jump = self.emit(span, instr!(JMP))?;
        let false_label = self.nop(span, "if false")?;
        self.compile_expression(false_branch, scope)?;
        let merge = self.emit(span, instr!(ST, rel(SP, 2)).describe("after if"))?;
        self.pop(span)?;
        self.text.patch_jump(false_jump, false_label);
        self.text.patch_jump(exit_jump, merge);
        Ok(())
    }
}

/// Step E: replaces every symbolic `CALL` by a control-flow address from
/// the symbol table.
fn link<'i>(
    text: TextSegment<'i>,
    symbols: &HashMap<&'i str, usize>,
) -> Result<Vec<Instruction>> {
    text.into_entries()
        .into_iter()
        .map(|entry| match entry {
            TextEntry::Complete(instruction) => Ok(instruction),
            TextEntry::Call {
                symbol,
                span,
                debug,
            } => {
                let address = *symbols.get(symbol).ok_or_else(|| {
                    new_parser_error(span, format!("unresolved function symbol [{}]", symbol))
                })?;
                Ok(Instruction::with_address(
                    Opcode::CALL,
                    Address::ControlFlow {
                        value: address as Word,
                    },
                )
                .describe(debug))
            }
        })
        .collect()
}
