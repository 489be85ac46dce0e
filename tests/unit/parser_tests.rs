//! Unit tests for the rule condition parser

use eventwatch::services::rules::RuleError;
use eventwatch::services::rules::parser::{
    BinaryOp, CompareOp, Expr, Literal, MAX_SOURCE_LEN, parse,
};

#[test]
fn test_precedence_of_arithmetic_and_comparison() {
    let expr = parse("1 + 2 * 3 > 4").unwrap();

    let Expr::Compare(lhs, rest) = expr else {
        panic!("expected comparison");
    };
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].0, CompareOp::Gt);
    let Expr::Binary(BinaryOp::Add, _, rhs) = *lhs else {
        panic!("expected addition at the top of the left operand");
    };
    assert!(matches!(*rhs, Expr::Binary(BinaryOp::Mul, _, _)));
}

#[test]
fn test_not_in_and_is_not() {
    let expr = parse("'x' not in diff and path is not None").unwrap();

    let Expr::And(lhs, rhs) = expr else {
        panic!("expected conjunction");
    };
    assert!(matches!(*lhs, Expr::Compare(_, ref ops) if ops[0].0 == CompareOp::NotIn));
    assert!(matches!(*rhs, Expr::Compare(_, ref ops) if ops[0].0 == CompareOp::Ne));
}

#[test]
fn test_method_call_and_subscript() {
    let expr = parse("data['/w/a'].get('size', 0)").unwrap();

    let Expr::Method(receiver, name, args) = expr else {
        panic!("expected method call");
    };
    assert_eq!(name, "get");
    assert_eq!(args.len(), 2);
    assert!(matches!(*receiver, Expr::Index(_, _)));
}

#[test]
fn test_literals() {
    assert_eq!(parse("1_000").unwrap(), Expr::Literal(Literal::Int(1000)));
    assert_eq!(parse("2.5e1").unwrap(), Expr::Literal(Literal::Float(25.0)));
    assert_eq!(
        parse(r#""a\"b""#).unwrap(),
        Expr::Literal(Literal::Str("a\"b".to_string()))
    );
    assert_eq!(parse("true").unwrap(), Expr::Literal(Literal::Bool(true)));
    assert_eq!(parse("None").unwrap(), Expr::Literal(Literal::None));
}

#[test]
fn test_syntax_errors_carry_offset() {
    let err = parse("size >").unwrap_err();
    assert!(matches!(err, RuleError::Syntax { .. }));

    let err = parse("size > 1 )").unwrap_err();
    let RuleError::Syntax { offset, .. } = err else {
        panic!("expected syntax error");
    };
    assert_eq!(offset, 9);

    assert!(matches!(parse("   ").unwrap_err(), RuleError::Syntax { .. }));
    assert!(matches!(parse("'open").unwrap_err(), RuleError::Syntax { .. }));
    assert!(matches!(parse("a = 1").unwrap_err(), RuleError::Syntax { .. }));
}

#[test]
fn test_calling_an_expression_is_rejected() {
    assert!(matches!(
        parse("data['x'](1)").unwrap_err(),
        RuleError::Syntax { .. }
    ));
}

#[test]
fn test_complexity_limits() {
    let long = format!("1 + {}", "1 + ".repeat(MAX_SOURCE_LEN / 4)) + "1";
    assert!(matches!(parse(&long).unwrap_err(), RuleError::TooComplex(_)));

    let nested = format!("{}1{}", "(".repeat(100), ")".repeat(100));
    assert!(matches!(parse(&nested).unwrap_err(), RuleError::TooComplex(_)));

    let shallow = format!("{}1{}", "(".repeat(10), ")".repeat(10));
    assert!(parse(&shallow).is_ok());
}

#[test]
fn test_long_operator_chains_are_too_complex() {
    let sums = format!("1{}", "+1".repeat(2000));
    assert!(sums.len() <= MAX_SOURCE_LEN);
    assert!(matches!(parse(&sums).unwrap_err(), RuleError::TooComplex(_)));

    let conjunction = format!("a{}", " and a".repeat(600));
    assert!(matches!(parse(&conjunction).unwrap_err(), RuleError::TooComplex(_)));

    let disjunction = format!("a{}", " or a".repeat(600));
    assert!(matches!(parse(&disjunction).unwrap_err(), RuleError::TooComplex(_)));

    let products = format!("2{}", "*2".repeat(1500));
    assert!(matches!(parse(&products).unwrap_err(), RuleError::TooComplex(_)));

    let attributes = format!("x{}", ".a".repeat(1500));
    assert!(matches!(parse(&attributes).unwrap_err(), RuleError::TooComplex(_)));

    let indexes = format!("x{}", "[0]".repeat(1000));
    assert!(matches!(parse(&indexes).unwrap_err(), RuleError::TooComplex(_)));
}

#[test]
fn test_short_chains_still_parse() {
    let sums = format!("1{}", "+1".repeat(30));
    assert!(parse(&sums).is_ok());
    assert!(parse("a and b and c or d or e").is_ok());
    assert!(parse("file.get('size', 0) + prev_file.get('size', 0) * 2 > 10").is_ok());
}
