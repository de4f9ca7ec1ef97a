//! Builds the expression tree out of the pest parse.

use matches::debug_assert_matches;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use lvm::Word;

use crate::ast::{BinaryOperator, Expression, NullaryOperator, UnaryOperator};
use crate::{new_parser_error, Result};

#[derive(Parser)]
#[grammar = "lisp.pest"]
pub struct LispParser;

/// Parses a whole program into its root expression.
pub fn parse(input: &str) -> Result<Expression> {
    let program = LispParser::parse(Rule::program, input)?.next().unwrap();
    process_program(program)
}

fn process_program(pair: Pair<Rule>) -> Result<Expression> {
    debug_assert_matches!(pair.as_rule(), Rule::program);
    let expressions = pair
        .into_inner()
        .filter(|inner| inner.as_rule() != Rule::EOI)
        .map(process_expression)
        .collect::<Result<Vec<_>>>()?;
    Ok(Expression::Root { expressions })
}

fn process_expression(pair: Pair<Rule>) -> Result<Expression> {
    let span = pair.as_span();
    match pair.as_rule() {
        Rule::number => {
            let value = process_number(&pair)?;
            Ok(Expression::Number { span, value })
        }
        Rule::character => {
            // Character literals fold to their integer code right here.
            let inner = pair.into_inner().next().unwrap();
            let code = inner.as_str().chars().next().unwrap();
            Ok(Expression::Number {
                span,
                value: code as u32 as Word,
            })
        }
        Rule::string => {
            let inner = pair.into_inner().next().unwrap();
            Ok(Expression::StringLiteral {
                span,
                value: inner.as_str(),
            })
        }
        Rule::identifier => Ok(Expression::Variable {
            span,
            name: pair.as_str(),
        }),
        Rule::function_definition => {
            let mut pairs = pair.into_inner();
            pairs.next().unwrap(); // keyword
            let name = pairs.next().unwrap().as_str();
            let parameters = pairs
                .next()
                .unwrap()
                .into_inner()
                .map(|parameter| parameter.as_str())
                .collect();
            let body = pairs.map(process_expression).collect::<Result<Vec<_>>>()?;
            Ok(Expression::FunctionDefinition {
                span,
                name,
                parameters,
                body,
            })
        }
        Rule::assignment => {
            let mut pairs = pair.into_inner();
            pairs.next().unwrap(); // keyword
            let name = pairs.next().unwrap().as_str();
            let value = process_expression(pairs.next().unwrap())?;
            Ok(Expression::Assignment {
                span,
                name,
                value: Box::new(value),
            })
        }
        Rule::conditional => {
            let mut pairs = pair.into_inner();
            pairs.next().unwrap(); // keyword
            let condition = process_expression(pairs.next().unwrap())?;
            let true_branch = process_expression(pairs.next().unwrap())?;
            let false_branch = process_expression(pairs.next().unwrap())?;
            Ok(Expression::Conditional {
                span,
                condition: Box::new(condition),
                true_branch: Box::new(true_branch),
                false_branch: Box::new(false_branch),
            })
        }
        Rule::loop_expression => {
            let mut pairs = pair.into_inner();
            pairs.next().unwrap(); // keyword
            let condition = process_expression(pairs.next().unwrap())?;
            let body = pairs.map(process_expression).collect::<Result<Vec<_>>>()?;
            Ok(Expression::Loop {
                span,
                condition: Box::new(condition),
                body,
            })
        }
        Rule::allocation => {
            let mut pairs = pair.into_inner();
            pairs.next().unwrap(); // keyword
            let size_pair = pairs.next().unwrap();
            let size = process_number(&size_pair)? as usize;
            Ok(Expression::Allocation { span, size })
        }
        Rule::binary_operation => {
            let mut pairs = pair.into_inner();
            let operator = process_binary_operator(&pairs.next().unwrap());
            let first = process_expression(pairs.next().unwrap())?;
            let second = process_expression(pairs.next().unwrap())?;
            Ok(Expression::BinaryOperation {
                span,
                operator,
                first: Box::new(first),
                second: Box::new(second),
            })
        }
        Rule::unary_operation => {
            let mut pairs = pair.into_inner();
            let operator = process_unary_operator(&pairs.next().unwrap());
            let operand = process_expression(pairs.next().unwrap())?;
            Ok(Expression::UnaryOperation {
                span,
                operator,
                operand: Box::new(operand),
            })
        }
        Rule::nullary_operation => Ok(Expression::NullaryOperation {
            span,
            operator: NullaryOperator::Get,
        }),
        Rule::function_call => {
            let mut pairs = pair.into_inner();
            let name = pairs.next().unwrap().as_str();
            let arguments = pairs.map(process_expression).collect::<Result<Vec<_>>>()?;
            Ok(Expression::FunctionCall {
                span,
                name,
                arguments,
            })
        }
        _ => unreachable!(),
    }
}

fn process_number(pair: &Pair<Rule>) -> Result<Word> {
    debug_assert_matches!(pair.as_rule(), Rule::number);
    pair.as_str()
        .parse::<i64>()
        .ok()
        .filter(|value| *value <= i64::from(Word::max_value()))
        .map(|value| value as Word)
        .ok_or_else(|| {
            new_parser_error(
                pair.as_span(),
                "number literal out of the word range".to_owned(),
            )
        })
}

fn process_binary_operator(pair: &Pair<Rule>) -> BinaryOperator {
    debug_assert_matches!(pair.as_rule(), Rule::binary_operator);
    match pair.as_str() {
        "+" => BinaryOperator::Add,
        "-" => BinaryOperator::Sub,
        "and" => BinaryOperator::And,
        "or" => BinaryOperator::Or,
        "=" => BinaryOperator::Equals,
        "<" => BinaryOperator::Less,
        ">" => BinaryOperator::Greater,
        "store" => BinaryOperator::Store,
        _ => unreachable!(),
    }
}

fn process_unary_operator(pair: &Pair<Rule>) -> UnaryOperator {
    debug_assert_matches!(pair.as_rule(), Rule::unary_operator);
    match pair.as_str() {
        "not" => UnaryOperator::Not,
        "load" => UnaryOperator::Load,
        "put" => UnaryOperator::Put,
        _ => unreachable!(),
    }
}
