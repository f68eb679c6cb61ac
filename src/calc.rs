//! Calculations
//!
//! The fixed operation table behind `calc` expressions. Operands arrive fully
//! resolved; every operation is a pure function of them.

use std::cmp::Ordering;
use std::path::PathBuf;

use crate::error::{EngineError, EngineResult};
use crate::value::Value;

pub type Operation = fn(&[Value]) -> EngineResult<Value>;

/// Largest string (in bytes) or sequence `*` may build.
pub const MAX_REPEATED_LEN: usize = 1 << 24;

const OPERATIONS: &[(&str, Operation)] = &[
    ("+", op_add),
    ("-", op_sub),
    ("*", op_mul),
    ("/", op_div),
    ("//", op_floor_div),
    ("**", op_pow),
    ("%", op_mod),
    ("round", op_round),
    ("sum", op_sum),
    ("min", op_min),
    ("max", op_max),
    ("getitem", op_getitem),
    ("dict.get", op_dict_get),
    ("str.format", op_str_format),
    ("path.join", op_path_join),
    ("if", op_if),
    ("contains", op_contains),
    ("not", op_not),
    ("eq", op_eq),
    ("ne", op_ne),
    ("gt", op_gt),
    ("ge", op_ge),
    ("lt", op_lt),
    ("le", op_le),
    ("int", op_int),
    ("float", op_float),
    ("str", op_str),
    ("and", op_and),
    ("or", op_or),
    ("all", op_all),
    ("any", op_any),
    ("is", op_is),
    ("is_not", op_is_not),
    ("json.dumps", op_json_dumps),
    ("json.loads", op_json_loads),
];

pub fn lookup(op: &str) -> Option<Operation> {
    OPERATIONS
        .iter()
        .find(|(name, _)| *name == op)
        .map(|(_, f)| *f)
}

pub fn operation_names() -> impl Iterator<Item = &'static str> {
    OPERATIONS.iter().map(|(name, _)| *name)
}

/// Apply `op` to already-resolved operands.
pub fn calculate(op: &str, args: &[Value]) -> EngineResult<Value> {
    let operation = lookup(op).ok_or_else(|| EngineError::UnknownOperation(op.to_string()))?;
    operation(args).map_err(|err| match err {
        EngineError::Calculation { message, .. } => EngineError::calculation(op, message),
        other => other,
    })
}

/// Ordering between two values of a comparable kind: numbers (booleans count
/// as 0 and 1), strings, and sequences compared element by element.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Sequence(xs), Value::Sequence(ys)) => {
            for (x, y) in xs.iter().zip(ys) {
                match compare_values(x, y)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(xs.len().cmp(&ys.len()))
        }
        (Value::Number(_) | Value::Bool(_), Value::Number(_) | Value::Bool(_)) => {
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        _ => None,
    }
}

/// Equality where numbers and booleans compare by numeric value.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_) | Value::Bool(_), Value::Number(_) | Value::Bool(_)) => {
            a.as_f64() == b.as_f64()
        }
        (Value::Sequence(xs), Value::Sequence(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| loose_eq(x, y))
        }
        (Value::Mapping(xs), Value::Mapping(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| loose_eq(x, y)))
        }
        _ => a == b,
    }
}

fn fail(message: impl Into<String>) -> EngineError {
    EngineError::calculation("", message)
}

fn arity(args: &[Value], min: usize, max: usize) -> EngineResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{min} to {max}")
        };
        return Err(fail(format!(
            "expected {expected} arguments, got {}",
            args.len()
        )));
    }
    Ok(())
}

fn binary(args: &[Value]) -> EngineResult<(&Value, &Value)> {
    arity(args, 2, 2)?;
    Ok((&args[0], &args[1]))
}

fn unary(args: &[Value]) -> EngineResult<&Value> {
    arity(args, 1, 1)?;
    Ok(&args[0])
}

fn number(value: &Value) -> EngineResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| fail(format!("expected a number, got {}", value.type_name())))
}

fn numbers(args: &[Value]) -> EngineResult<(f64, f64)> {
    let (a, b) = binary(args)?;
    Ok((number(a)?, number(b)?))
}

fn integer(value: &Value) -> EngineResult<i64> {
    let n = number(value)?;
    if n.fract() != 0.0 || !n.is_finite() {
        return Err(fail(format!("expected an integer, got {n}")));
    }
    Ok(n as i64)
}

/// A single sequence argument spreads into its elements.
fn spread(args: &[Value]) -> &[Value] {
    match args {
        [Value::Sequence(items)] => items,
        _ => args,
    }
}

fn add(a: &Value, b: &Value) -> EngineResult<Value> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(Value::String(format!("{x}{y}"))),
        (Value::Sequence(x), Value::Sequence(y)) => {
            Ok(Value::Sequence(x.iter().chain(y).cloned().collect()))
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(Value::Number(x + y)),
            _ => Err(fail(format!(
                "cannot add {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        },
    }
}

fn op_add(args: &[Value]) -> EngineResult<Value> {
    let (a, b) = binary(args)?;
    add(a, b)
}

fn op_sub(args: &[Value]) -> EngineResult<Value> {
    let (a, b) = numbers(args)?;
    Ok(Value::Number(a - b))
}

fn op_mul(args: &[Value]) -> EngineResult<Value> {
    let (a, b) = binary(args)?;
    match (a, b) {
        (Value::String(s), n) | (n, Value::String(s)) => {
            Ok(Value::String(s.repeat(repetitions(s.len(), n)?)))
        }
        (Value::Sequence(items), n) | (n, Value::Sequence(items)) => {
            let times = repetitions(items.len(), n)?;
            Ok(Value::Sequence(
                (0..times).flat_map(|_| items.iter().cloned()).collect(),
            ))
        }
        _ => Ok(Value::Number(number(a)? * number(b)?)),
    }
}

/// Repeat count for `len` units, refusing results past `MAX_REPEATED_LEN`.
fn repetitions(len: usize, count: &Value) -> EngineResult<usize> {
    let times = usize::try_from(integer(count)?.max(0)).unwrap_or(usize::MAX);
    if len == 0 {
        return Ok(0);
    }
    match len.checked_mul(times) {
        Some(total) if total <= MAX_REPEATED_LEN => Ok(times),
        _ => Err(fail("repetition too large")),
    }
}

fn divisor(b: f64) -> EngineResult<f64> {
    if b == 0.0 {
        return Err(fail("division by zero"));
    }
    Ok(b)
}

fn op_div(args: &[Value]) -> EngineResult<Value> {
    let (a, b) = numbers(args)?;
    Ok(Value::Number(a / divisor(b)?))
}

fn op_floor_div(args: &[Value]) -> EngineResult<Value> {
    let (a, b) = numbers(args)?;
    Ok(Value::Number((a / divisor(b)?).floor()))
}

fn op_pow(args: &[Value]) -> EngineResult<Value> {
    let (a, b) = numbers(args)?;
    Ok(Value::Number(a.powf(b)))
}

/// Remainder taking the sign of the divisor.
fn op_mod(args: &[Value]) -> EngineResult<Value> {
    let (a, b) = numbers(args)?;
    let b = divisor(b)?;
    Ok(Value::Number(a - b * (a / b).floor()))
}

/// Half-to-even rounding, to a whole number or to `digits` decimal places.
fn op_round(args: &[Value]) -> EngineResult<Value> {
    arity(args, 1, 2)?;
    let n = number(&args[0])?;
    let digits = match args.get(1) {
        None | Some(Value::Null) => 0,
        Some(d) => integer(d)?,
    };
    let scale = 10f64.powi(digits as i32);
    Ok(Value::Number((n * scale).round_ties_even() / scale))
}

fn op_sum(args: &[Value]) -> EngineResult<Value> {
    spread(args)
        .iter()
        .try_fold(Value::Number(0.0), |acc, item| add(&acc, item))
}

fn extreme(args: &[Value], wanted: Ordering) -> EngineResult<Value> {
    let items = spread(args);
    let mut best = items.first().ok_or_else(|| fail("empty argument list"))?;
    for item in &items[1..] {
        let ordering = compare_values(item, best).ok_or_else(|| {
            fail(format!(
                "cannot compare {} with {}",
                item.type_name(),
                best.type_name()
            ))
        })?;
        if ordering == wanted {
            best = item;
        }
    }
    Ok(best.clone())
}

fn op_min(args: &[Value]) -> EngineResult<Value> {
    extreme(args, Ordering::Less)
}

fn op_max(args: &[Value]) -> EngineResult<Value> {
    extreme(args, Ordering::Greater)
}

fn index_into(len: usize, index: i64) -> EngineResult<usize> {
    let resolved = if index < 0 { len as i64 + index } else { index };
    if resolved < 0 || resolved >= len as i64 {
        return Err(fail(format!("index {index} out of range for length {len}")));
    }
    Ok(resolved as usize)
}

fn op_getitem(args: &[Value]) -> EngineResult<Value> {
    let (container, key) = binary(args)?;
    match container {
        Value::Sequence(items) => Ok(items[index_into(items.len(), integer(key)?)?].clone()),
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let c = chars[index_into(chars.len(), integer(key)?)?];
            Ok(Value::String(c.to_string()))
        }
        Value::Mapping(map) => {
            let k = key
                .as_str()
                .ok_or_else(|| fail(format!("mapping keys are strings, got {}", key.type_name())))?;
            map.get(k)
                .cloned()
                .ok_or_else(|| fail(format!("key not found: {k}")))
        }
        other => Err(fail(format!("cannot index into {}", other.type_name()))),
    }
}

fn op_dict_get(args: &[Value]) -> EngineResult<Value> {
    arity(args, 2, 3)?;
    let map = args[0].expect_mapping("dict.get")?;
    let key = args[1].expect_str("dict.get")?;
    Ok(map
        .get(key)
        .cloned()
        .unwrap_or_else(|| args.get(2).cloned().unwrap_or_default()))
}

/// Positional `{}` and `{N}` substitution; `{{` and `}}` escape braces.
fn op_str_format(args: &[Value]) -> EngineResult<Value> {
    let (template, values) = args
        .split_first()
        .ok_or_else(|| fail("missing format string"))?;
    let template = template.expect_str("str.format")?;

    let mut out = String::with_capacity(template.len());
    let mut next_auto = 0;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => field.push(ch),
                        None => return Err(fail("unterminated replacement field")),
                    }
                }
                let index = if field.is_empty() {
                    next_auto += 1;
                    next_auto - 1
                } else {
                    field
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| fail(format!("unsupported replacement field: {{{field}}}")))?
                };
                let value = values
                    .get(index)
                    .ok_or_else(|| fail(format!("no argument for replacement field {index}")))?;
                out.push_str(&value.to_string());
            }
            '}' => return Err(fail("single '}' in format string")),
            other => out.push(other),
        }
    }
    Ok(Value::String(out))
}

fn op_path_join(args: &[Value]) -> EngineResult<Value> {
    let mut path = PathBuf::new();
    for part in args {
        path.push(part.expect_str("path.join")?);
    }
    Ok(Value::String(path.to_string_lossy().into_owned()))
}

fn op_if(args: &[Value]) -> EngineResult<Value> {
    arity(args, 3, 3)?;
    Ok(if args[0].is_truthy() {
        args[1].clone()
    } else {
        args[2].clone()
    })
}

fn op_contains(args: &[Value]) -> EngineResult<Value> {
    let (container, item) = binary(args)?;
    let found = match container {
        Value::Sequence(items) => items.iter().any(|x| loose_eq(x, item)),
        Value::Mapping(map) => item.as_str().is_some_and(|k| map.contains_key(k)),
        Value::String(s) => s.contains(item.expect_str("contains")?),
        other => return Err(fail(format!("{} is not a container", other.type_name()))),
    };
    Ok(Value::Bool(found))
}

fn op_not(args: &[Value]) -> EngineResult<Value> {
    Ok(Value::Bool(!unary(args)?.is_truthy()))
}

fn op_eq(args: &[Value]) -> EngineResult<Value> {
    let (a, b) = binary(args)?;
    Ok(Value::Bool(loose_eq(a, b)))
}

fn op_ne(args: &[Value]) -> EngineResult<Value> {
    let (a, b) = binary(args)?;
    Ok(Value::Bool(!loose_eq(a, b)))
}

fn ordered(args: &[Value], accept: fn(Ordering) -> bool) -> EngineResult<Value> {
    let (a, b) = binary(args)?;
    let ordering = compare_values(a, b).ok_or_else(|| {
        fail(format!(
            "cannot order {} and {}",
            a.type_name(),
            b.type_name()
        ))
    })?;
    Ok(Value::Bool(accept(ordering)))
}

fn op_gt(args: &[Value]) -> EngineResult<Value> {
    ordered(args, Ordering::is_gt)
}

fn op_ge(args: &[Value]) -> EngineResult<Value> {
    ordered(args, Ordering::is_ge)
}

fn op_lt(args: &[Value]) -> EngineResult<Value> {
    ordered(args, Ordering::is_lt)
}

fn op_le(args: &[Value]) -> EngineResult<Value> {
    ordered(args, Ordering::is_le)
}

fn op_int(args: &[Value]) -> EngineResult<Value> {
    let n = match unary(args)? {
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| fail(format!("invalid integer literal: {s:?}")))? as f64,
        other => number(other)?.trunc(),
    };
    Ok(Value::Number(n))
}

fn op_float(args: &[Value]) -> EngineResult<Value> {
    let n = match unary(args)? {
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| fail(format!("invalid number literal: {s:?}")))?,
        other => number(other)?,
    };
    Ok(Value::Number(n))
}

fn op_str(args: &[Value]) -> EngineResult<Value> {
    Ok(Value::String(unary(args)?.to_string()))
}

fn op_and(args: &[Value]) -> EngineResult<Value> {
    let (a, b) = binary(args)?;
    Ok(if a.is_truthy() { b.clone() } else { a.clone() })
}

fn op_or(args: &[Value]) -> EngineResult<Value> {
    let (a, b) = binary(args)?;
    Ok(if a.is_truthy() { a.clone() } else { b.clone() })
}

fn op_all(args: &[Value]) -> EngineResult<Value> {
    Ok(Value::Bool(spread(args).iter().all(Value::is_truthy)))
}

fn op_any(args: &[Value]) -> EngineResult<Value> {
    Ok(Value::Bool(spread(args).iter().any(Value::is_truthy)))
}

fn op_is(args: &[Value]) -> EngineResult<Value> {
    let (a, b) = binary(args)?;
    Ok(Value::Bool(a == b))
}

fn op_is_not(args: &[Value]) -> EngineResult<Value> {
    let (a, b) = binary(args)?;
    Ok(Value::Bool(a != b))
}

fn op_json_dumps(args: &[Value]) -> EngineResult<Value> {
    Ok(Value::String(serde_json::to_string(&unary(args)?.to_json())?))
}

fn op_json_loads(args: &[Value]) -> EngineResult<Value> {
    let text = unary(args)?.expect_str("json.loads")?;
    Ok(Value::from_json(serde_json::from_str(text)?))
}
