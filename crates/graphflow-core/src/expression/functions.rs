//! Built-in `$function` catalog.
//!
//! The catalog is an open table: hosts can [`FunctionTable::register`] extra
//! functions, and [`FUNCTION_CATALOG_VERSION`] identifies the standard set so
//! stored workflows can be checked against the engine they were written for.
//! Nothing here reads a random source or the wall clock directly; date
//! functions use the context's `now` snapshot.

use std::collections::HashMap;
use std::fmt::Write as _;

use chrono::{DateTime, Months, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde_json::{Map, Value};

use super::context::format_timestamp;
use super::eval::{EvalError, Interpreter, Item, compare, deep_eq, number, truthy, type_name};

/// Version of the standard catalog returned by [`FunctionTable::standard`].
pub const FUNCTION_CATALOG_VERSION: u32 = 1;

/// Native implementation of a built-in.
pub type NativeFn = fn(&Interpreter<'_>, Vec<Item>) -> Result<Item, EvalError>;

#[derive(Clone, Copy)]
pub struct FunctionSpec {
    pub min_args: usize,
    /// `None` for variadic functions.
    pub max_args: Option<usize>,
    pub func: NativeFn,
}

impl std::fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .finish()
    }
}

/// Name -> implementation table consulted for `$name(..)` calls.
#[derive(Debug, Clone)]
pub struct FunctionTable {
    functions: HashMap<String, FunctionSpec>,
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl FunctionTable {
    /// A table with no functions at all.
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// The standard catalog.
    pub fn standard() -> Self {
        let mut t = Self::empty();

        // Strings
        t.register("string", 1, Some(1), fn_string);
        t.register("length", 1, Some(1), fn_length);
        t.register("substring", 2, Some(3), fn_substring);
        t.register("uppercase", 1, Some(1), fn_uppercase);
        t.register("lowercase", 1, Some(1), fn_lowercase);
        t.register("trim", 1, Some(1), fn_trim);
        t.register("contains", 2, Some(2), fn_contains);
        t.register("startsWith", 2, Some(2), fn_starts_with);
        t.register("endsWith", 2, Some(2), fn_ends_with);
        t.register("split", 2, Some(3), fn_split);
        t.register("join", 1, Some(2), fn_join);
        t.register("replace", 3, Some(4), fn_replace);
        t.register("pad", 2, Some(3), fn_pad);

        // Numbers
        t.register("number", 1, Some(1), fn_number);
        t.register("abs", 1, Some(1), fn_abs);
        t.register("floor", 1, Some(1), fn_floor);
        t.register("ceil", 1, Some(1), fn_ceil);
        t.register("round", 1, Some(2), fn_round);
        t.register("power", 2, Some(2), fn_power);
        t.register("sqrt", 1, Some(1), fn_sqrt);
        t.register("sum", 1, Some(1), fn_sum);
        t.register("max", 1, Some(1), fn_max);
        t.register("min", 1, Some(1), fn_min);
        t.register("average", 1, Some(1), fn_average);
        t.register("count", 1, Some(1), fn_count);

        // Arrays and objects
        t.register("append", 2, Some(2), fn_append);
        t.register("reverse", 1, Some(1), fn_reverse);
        t.register("sort", 1, Some(2), fn_sort);
        t.register("distinct", 1, Some(1), fn_distinct);
        t.register("flatten", 1, Some(1), fn_flatten);
        t.register("first", 1, Some(1), fn_first);
        t.register("last", 1, Some(1), fn_last);
        t.register("map", 2, Some(2), fn_map);
        t.register("filter", 2, Some(2), fn_filter);
        t.register("reduce", 2, Some(3), fn_reduce);
        t.register("keys", 1, Some(1), fn_keys);
        t.register("values", 1, Some(1), fn_values);
        t.register("exists", 1, Some(1), fn_exists);
        t.register("lookup", 2, Some(2), fn_lookup);
        t.register("merge", 1, None, fn_merge);
        t.register("type", 1, Some(1), fn_type);
        t.register("boolean", 1, Some(1), fn_boolean);
        t.register("not", 1, Some(1), fn_not);

        // Dates
        t.register("now", 0, Some(0), fn_now);
        t.register("millis", 0, Some(0), fn_millis);
        t.register("today", 0, Some(0), fn_today);
        t.register("toMillis", 1, Some(1), fn_to_millis);
        t.register("fromMillis", 1, Some(2), fn_from_millis);
        t.register("formatDate", 1, Some(2), fn_format_date);
        t.register("dateAdd", 3, Some(3), fn_date_add);

        // Context
        t.register("node", 1, Some(1), fn_node);

        t
    }

    /// Add or replace a function. Returns the previous definition, if any.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        min_args: usize,
        max_args: Option<usize>,
        func: NativeFn,
    ) -> Option<FunctionSpec> {
        self.functions.insert(
            name.into(),
            FunctionSpec {
                min_args,
                max_args,
                func,
            },
        )
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn call(
        &self,
        name: &str,
        interp: &Interpreter<'_>,
        args: Vec<Item>,
    ) -> Result<Item, EvalError> {
        let spec = self
            .functions
            .get(name)
            .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;

        let got = args.len();
        let too_few = got < spec.min_args;
        let too_many = spec.max_args.is_some_and(|max| got > max);
        if too_few || too_many {
            let expected = match spec.max_args {
                Some(max) if max == spec.min_args => format!("{max}"),
                Some(max) => format!("{} to {max}", spec.min_args),
                None => format!("at least {}", spec.min_args),
            };
            return Err(EvalError::Arity {
                name: name.to_string(),
                message: format!("expected {expected} argument(s), got {got}"),
            });
        }

        (spec.func)(interp, args)
    }
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn fail(msg: impl Into<String>) -> EvalError {
    EvalError::message(msg)
}

fn val(args: &[Item], i: usize) -> Option<&Value> {
    args.get(i).and_then(Item::as_value)
}

fn str_arg<'a>(args: &'a [Item], i: usize, func: &str) -> Result<Option<&'a str>, EvalError> {
    match val(args, i) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(fail(format!(
            "${func} expects a string, got {}",
            type_name(other)
        ))),
    }
}

fn num_arg(args: &[Item], i: usize, func: &str) -> Result<Option<f64>, EvalError> {
    match val(args, i) {
        None => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(fail(format!(
            "${func} expects a number, got {}",
            type_name(other)
        ))),
    }
}

/// Array argument; a scalar is treated as a one-element array.
fn array_arg(args: &[Item], i: usize) -> Option<Vec<Value>> {
    match val(args, i) {
        None => None,
        Some(Value::Array(items)) => Some(items.clone()),
        Some(other) => Some(vec![other.clone()]),
    }
}

fn numbers(items: &[Value], func: &str) -> Result<Vec<f64>, EvalError> {
    items
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                fail(format!(
                    "${func} expects an array of numbers, found {}",
                    type_name(v)
                ))
            })
        })
        .collect()
}

fn num_item(n: f64) -> Result<Item, EvalError> {
    Ok(Item::Value(number(n)?))
}

fn str_item(s: impl Into<String>) -> Result<Item, EvalError> {
    Ok(Item::Value(Value::String(s.into())))
}

fn bool_item(b: bool) -> Result<Item, EvalError> {
    Ok(Item::Value(Value::Bool(b)))
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

fn fn_string(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    match &args[0] {
        Item::Undefined => Ok(Item::Undefined),
        Item::Value(Value::String(s)) => str_item(s.clone()),
        Item::Value(other) => str_item(other.to_string()),
        Item::Function(_) => Err(fail("$string cannot stringify a function")),
    }
}

fn fn_length(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    match val(&args, 0) {
        None => Ok(Item::Undefined),
        Some(Value::String(s)) => num_item(s.chars().count() as f64),
        Some(Value::Array(a)) => num_item(a.len() as f64),
        Some(other) => Err(fail(format!(
            "$length expects a string, got {}",
            type_name(other)
        ))),
    }
}

fn fn_substring(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(s) = str_arg(&args, 0, "substring")? else {
        return Ok(Item::Undefined);
    };
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as i64;
    let start = num_arg(&args, 1, "substring")?.unwrap_or(0.0) as i64;
    let start = if start < 0 { (len + start).max(0) } else { start.min(len) };
    let end = match num_arg(&args, 2, "substring")? {
        Some(n) => start.saturating_add((n as i64).max(0)).min(len),
        None => len,
    };
    str_item(chars[start as usize..end as usize].iter().collect::<String>())
}

fn fn_uppercase(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    match str_arg(&args, 0, "uppercase")? {
        Some(s) => str_item(s.to_uppercase()),
        None => Ok(Item::Undefined),
    }
}

fn fn_lowercase(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    match str_arg(&args, 0, "lowercase")? {
        Some(s) => str_item(s.to_lowercase()),
        None => Ok(Item::Undefined),
    }
}

/// Trims both ends and collapses internal whitespace runs to one space.
fn fn_trim(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    match str_arg(&args, 0, "trim")? {
        Some(s) => str_item(s.split_whitespace().collect::<Vec<_>>().join(" ")),
        None => Ok(Item::Undefined),
    }
}

fn fn_contains(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    match (val(&args, 0), val(&args, 1)) {
        (None, _) => Ok(Item::Undefined),
        (Some(Value::Array(items)), needle) => {
            bool_item(needle.is_some_and(|n| items.iter().any(|i| deep_eq(i, n))))
        }
        (Some(Value::String(s)), Some(Value::String(sub))) => bool_item(s.contains(sub.as_str())),
        (Some(Value::String(_)), _) => Err(fail("$contains expects a string pattern")),
        (Some(other), _) => Err(fail(format!(
            "$contains expects a string or array, got {}",
            type_name(other)
        ))),
    }
}

fn fn_starts_with(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let (Some(s), Some(prefix)) = (
        str_arg(&args, 0, "startsWith")?,
        str_arg(&args, 1, "startsWith")?,
    ) else {
        return Ok(Item::Undefined);
    };
    bool_item(s.starts_with(prefix))
}

fn fn_ends_with(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let (Some(s), Some(suffix)) = (
        str_arg(&args, 0, "endsWith")?,
        str_arg(&args, 1, "endsWith")?,
    ) else {
        return Ok(Item::Undefined);
    };
    bool_item(s.ends_with(suffix))
}

fn fn_split(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(s) = str_arg(&args, 0, "split")? else {
        return Ok(Item::Undefined);
    };
    let sep = str_arg(&args, 1, "split")?.unwrap_or("");
    let limit = num_arg(&args, 2, "split")?.map(|n| n.max(0.0) as usize);

    let parts: Vec<String> = if sep.is_empty() {
        s.chars().map(String::from).collect()
    } else {
        s.split(sep).map(String::from).collect()
    };
    let parts = parts
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(Value::String)
        .collect();
    Ok(Item::Value(Value::Array(parts)))
}

fn fn_join(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(items) = array_arg(&args, 0) else {
        return Ok(Item::Undefined);
    };
    let sep = str_arg(&args, 1, "join")?.unwrap_or("");
    let parts: Vec<String> = items
        .iter()
        .map(|v| match v {
            Value::String(s) => Ok(s.clone()),
            other => Err(fail(format!(
                "$join expects an array of strings, found {}",
                type_name(other)
            ))),
        })
        .collect::<Result<_, _>>()?;
    str_item(parts.join(sep))
}

fn fn_replace(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(s) = str_arg(&args, 0, "replace")? else {
        return Ok(Item::Undefined);
    };
    let pattern = str_arg(&args, 1, "replace")?.unwrap_or("");
    if pattern.is_empty() {
        return Err(fail("$replace pattern cannot be empty"));
    }
    let replacement = str_arg(&args, 2, "replace")?.unwrap_or("");
    match num_arg(&args, 3, "replace")? {
        Some(limit) => str_item(s.replacen(pattern, replacement, limit.max(0.0) as usize)),
        None => str_item(s.replace(pattern, replacement)),
    }
}

/// Widest result `$pad` will build, in characters.
const MAX_PAD_WIDTH: f64 = 10_000.0;

/// Positive width pads on the right, negative on the left.
fn fn_pad(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(s) = str_arg(&args, 0, "pad")? else {
        return Ok(Item::Undefined);
    };
    let width = num_arg(&args, 1, "pad")?.unwrap_or(0.0);
    if !width.is_finite() || width.abs() > MAX_PAD_WIDTH {
        return Err(fail(format!(
            "$pad width must be between -{MAX_PAD_WIDTH} and {MAX_PAD_WIDTH}, got {width}"
        )));
    }
    let fill = str_arg(&args, 2, "pad")?
        .and_then(|f| f.chars().next())
        .unwrap_or(' ');
    let missing = (width.abs() as usize).saturating_sub(s.chars().count());
    let padding: String = std::iter::repeat_n(fill, missing).collect();
    if width < 0.0 {
        str_item(format!("{padding}{s}"))
    } else {
        str_item(format!("{s}{padding}"))
    }
}

// ---------------------------------------------------------------------------
// Numbers
// ---------------------------------------------------------------------------

fn fn_number(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    match val(&args, 0) {
        None => Ok(Item::Undefined),
        Some(Value::Number(n)) => Ok(Item::Value(Value::Number(n.clone()))),
        Some(Value::Bool(b)) => num_item(if *b { 1.0 } else { 0.0 }),
        Some(Value::String(s)) => {
            let n: f64 = s
                .trim()
                .parse()
                .map_err(|_| fail(format!("$number cannot parse '{s}'")))?;
            num_item(n)
        }
        Some(other) => Err(fail(format!(
            "$number cannot convert {}",
            type_name(other)
        ))),
    }
}

fn unary_math(args: &[Item], func: &str, f: impl Fn(f64) -> f64) -> Result<Item, EvalError> {
    match num_arg(args, 0, func)? {
        Some(n) => num_item(f(n)),
        None => Ok(Item::Undefined),
    }
}

fn fn_abs(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    unary_math(&args, "abs", f64::abs)
}

fn fn_floor(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    unary_math(&args, "floor", f64::floor)
}

fn fn_ceil(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    unary_math(&args, "ceil", f64::ceil)
}

/// Rounds half away from zero at the given decimal precision.
fn fn_round(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(n) = num_arg(&args, 0, "round")? else {
        return Ok(Item::Undefined);
    };
    let precision = num_arg(&args, 1, "round")?.unwrap_or(0.0) as i32;
    let factor = 10f64.powi(precision);
    num_item((n * factor).round() / factor)
}

fn fn_power(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let (Some(base), Some(exp)) = (num_arg(&args, 0, "power")?, num_arg(&args, 1, "power")?)
    else {
        return Ok(Item::Undefined);
    };
    num_item(base.powf(exp))
}

fn fn_sqrt(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    match num_arg(&args, 0, "sqrt")? {
        Some(n) if n < 0.0 => Err(fail("$sqrt of a negative number")),
        Some(n) => num_item(n.sqrt()),
        None => Ok(Item::Undefined),
    }
}

fn fn_sum(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(items) = array_arg(&args, 0) else {
        return Ok(Item::Undefined);
    };
    num_item(numbers(&items, "sum")?.iter().sum())
}

fn fn_max(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(items) = array_arg(&args, 0) else {
        return Ok(Item::Undefined);
    };
    match numbers(&items, "max")?.into_iter().reduce(f64::max) {
        Some(n) => num_item(n),
        None => Ok(Item::Undefined),
    }
}

fn fn_min(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(items) = array_arg(&args, 0) else {
        return Ok(Item::Undefined);
    };
    match numbers(&items, "min")?.into_iter().reduce(f64::min) {
        Some(n) => num_item(n),
        None => Ok(Item::Undefined),
    }
}

fn fn_average(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(items) = array_arg(&args, 0) else {
        return Ok(Item::Undefined);
    };
    let nums = numbers(&items, "average")?;
    if nums.is_empty() {
        return Ok(Item::Undefined);
    }
    num_item(nums.iter().sum::<f64>() / nums.len() as f64)
}

fn fn_count(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let n = array_arg(&args, 0).map(|a| a.len()).unwrap_or(0);
    num_item(n as f64)
}

// ---------------------------------------------------------------------------
// Arrays and objects
// ---------------------------------------------------------------------------

fn fn_append(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    match (array_arg(&args, 0), array_arg(&args, 1)) {
        (None, None) => Ok(Item::Undefined),
        (Some(a), None) | (None, Some(a)) => Ok(Item::Value(Value::Array(a))),
        (Some(mut a), Some(b)) => {
            a.extend(b);
            Ok(Item::Value(Value::Array(a)))
        }
    }
}

fn fn_reverse(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(mut items) = array_arg(&args, 0) else {
        return Ok(Item::Undefined);
    };
    items.reverse();
    Ok(Item::Value(Value::Array(items)))
}

/// Without a comparator, sorts numbers or strings ascending. A comparator
/// `function($a, $b)` returns true when `$a` belongs after `$b`.
fn fn_sort(interp: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(items) = array_arg(&args, 0) else {
        return Ok(Item::Undefined);
    };
    let sorted = match args.get(1) {
        Some(f @ Item::Function(_)) => merge_sort(items, &mut |a: &Value, b: &Value| {
            let swap = interp.apply(f, vec![Item::Value(a.clone()), Item::Value(b.clone())])?;
            Ok(truthy(&swap))
        })?,
        Some(Item::Value(_)) => return Err(fail("$sort comparator must be a function")),
        _ => merge_sort(items, &mut |a: &Value, b: &Value| Ok(compare(a, b)?.is_gt()))?,
    };
    Ok(Item::Value(Value::Array(sorted)))
}

type After<'f> = dyn FnMut(&Value, &Value) -> Result<bool, EvalError> + 'f;

/// Stable merge sort over a fallible "a goes after b" predicate.
fn merge_sort(mut items: Vec<Value>, after: &mut After<'_>) -> Result<Vec<Value>, EvalError> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, after)?;
    let right = merge_sort(right, after)?;

    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        if after(l, r)? {
            out.extend(right.next());
        } else {
            out.extend(left.next());
        }
    }
    out.extend(left);
    out.extend(right);
    Ok(out)
}

fn fn_distinct(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(items) = array_arg(&args, 0) else {
        return Ok(Item::Undefined);
    };
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !out.iter().any(|seen| deep_eq(seen, &item)) {
            out.push(item);
        }
    }
    Ok(Item::Value(Value::Array(out)))
}

fn fn_flatten(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    fn flatten_into(v: Value, out: &mut Vec<Value>) {
        match v {
            Value::Array(items) => items.into_iter().for_each(|i| flatten_into(i, out)),
            other => out.push(other),
        }
    }
    let Some(items) = array_arg(&args, 0) else {
        return Ok(Item::Undefined);
    };
    let mut out = Vec::new();
    for item in items {
        flatten_into(item, &mut out);
    }
    Ok(Item::Value(Value::Array(out)))
}

fn fn_first(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    Ok(array_arg(&args, 0).and_then(|a| a.into_iter().next()).into())
}

fn fn_last(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    Ok(array_arg(&args, 0).and_then(|a| a.into_iter().last()).into())
}

fn index_item(i: usize) -> Item {
    Item::Value(Value::from(i as u64))
}

fn fn_map(interp: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(items) = array_arg(&args, 0) else {
        return Ok(Item::Undefined);
    };
    let whole = Item::Value(Value::Array(items.clone()));
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let mapped = interp.apply(&args[1], vec![Item::Value(item), index_item(i), whole.clone()])?;
        if let Some(v) = mapped.into_json()? {
            out.push(v);
        }
    }
    Ok(Item::Value(Value::Array(out)))
}

fn fn_filter(interp: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(items) = array_arg(&args, 0) else {
        return Ok(Item::Undefined);
    };
    let whole = Item::Value(Value::Array(items.clone()));
    let mut out = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        let keep = interp.apply(
            &args[1],
            vec![Item::Value(item.clone()), index_item(i), whole.clone()],
        )?;
        if truthy(&keep) {
            out.push(item);
        }
    }
    Ok(Item::Value(Value::Array(out)))
}

/// `$reduce(array, function($acc, $v, $i) {..}, init?)`
fn fn_reduce(interp: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(items) = array_arg(&args, 0) else {
        return Ok(Item::Undefined);
    };
    let mut iter = items.into_iter().enumerate();
    let mut acc = match args.get(2) {
        Some(init) => init.clone(),
        None => match iter.next() {
            Some((_, first)) => Item::Value(first),
            None => return Ok(Item::Undefined),
        },
    };
    for (i, item) in iter {
        acc = interp.apply(&args[1], vec![acc, Item::Value(item), index_item(i)])?;
    }
    Ok(acc)
}

fn fn_keys(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let mut keys: Vec<Value> = Vec::new();
    let mut push_keys = |map: &Map<String, Value>| {
        for k in map.keys() {
            let k = Value::String(k.clone());
            if !keys.contains(&k) {
                keys.push(k);
            }
        }
    };
    match val(&args, 0) {
        Some(Value::Object(map)) => push_keys(map),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_object)
            .for_each(&mut push_keys),
        _ => return Ok(Item::Undefined),
    }
    Ok(Item::Value(Value::Array(keys)))
}

fn fn_values(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    match val(&args, 0) {
        Some(Value::Object(map)) => Ok(Item::Value(Value::Array(map.values().cloned().collect()))),
        _ => Ok(Item::Undefined),
    }
}

fn fn_exists(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    bool_item(!args[0].is_undefined())
}

fn fn_lookup(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(key) = str_arg(&args, 1, "lookup")? else {
        return Ok(Item::Undefined);
    };
    match val(&args, 0) {
        Some(Value::Object(map)) => Ok(map.get(key).cloned().into()),
        Some(Value::Array(items)) => {
            let found: Vec<Value> = items
                .iter()
                .filter_map(|i| i.get(key).cloned())
                .collect();
            if found.is_empty() {
                Ok(Item::Undefined)
            } else {
                Ok(Item::Value(Value::Array(found)))
            }
        }
        _ => Ok(Item::Undefined),
    }
}

/// `$merge([obj, obj])` or `$merge(obj, obj, ..)`: shallow, later keys win.
fn fn_merge(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let sources: Vec<Value> = if args.len() == 1 {
        array_arg(&args, 0).unwrap_or_default()
    } else {
        args.iter().filter_map(|a| a.as_value().cloned()).collect()
    };
    let mut out = Map::new();
    for source in sources {
        match source {
            Value::Object(map) => out.extend(map),
            Value::Null => {}
            other => {
                return Err(fail(format!(
                    "$merge expects objects, found {}",
                    type_name(&other)
                )));
            }
        }
    }
    Ok(Item::Value(Value::Object(out)))
}

fn fn_type(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    match &args[0] {
        Item::Undefined => Ok(Item::Undefined),
        Item::Function(_) => str_item("function"),
        Item::Value(v) => str_item(type_name(v)),
    }
}

fn fn_boolean(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    match &args[0] {
        Item::Undefined => Ok(Item::Undefined),
        other => bool_item(truthy(other)),
    }
}

fn fn_not(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    match &args[0] {
        Item::Undefined => Ok(Item::Undefined),
        other => bool_item(!truthy(other)),
    }
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// Accepts epoch milliseconds, RFC 3339, `YYYY-MM-DDTHH:MM:SS` (UTC) or
/// `YYYY-MM-DD` (midnight UTC).
fn parse_date(v: &Value) -> Result<DateTime<Utc>, EvalError> {
    match v {
        Value::Number(n) => {
            let ms = n.as_f64().unwrap_or(0.0) as i64;
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| fail(format!("timestamp {ms} is out of range")))
        }
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                return Ok(naive.and_utc());
            }
            if let Some(naive) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
            {
                return Ok(naive.and_utc());
            }
            Err(fail(format!("cannot parse date '{s}'")))
        }
        other => Err(fail(format!("expected a date, got {}", type_name(other)))),
    }
}

fn format_with(date: DateTime<Utc>, pattern: Option<&str>) -> Result<Item, EvalError> {
    let Some(pattern) = pattern else {
        return str_item(format_timestamp(date));
    };
    let mut out = String::new();
    write!(out, "{}", date.format(pattern))
        .map_err(|_| fail(format!("invalid date format '{pattern}'")))?;
    str_item(out)
}

fn fn_now(interp: &Interpreter<'_>, _: Vec<Item>) -> Result<Item, EvalError> {
    str_item(format_timestamp(interp.context().now()))
}

fn fn_millis(interp: &Interpreter<'_>, _: Vec<Item>) -> Result<Item, EvalError> {
    Ok(Item::Value(Value::from(interp.context().now().timestamp_millis())))
}

fn fn_today(interp: &Interpreter<'_>, _: Vec<Item>) -> Result<Item, EvalError> {
    str_item(interp.context().now().format("%Y-%m-%d").to_string())
}

fn fn_to_millis(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    match val(&args, 0) {
        None => Ok(Item::Undefined),
        Some(v) => Ok(Item::Value(Value::from(parse_date(v)?.timestamp_millis()))),
    }
}

fn fn_from_millis(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(ms) = num_arg(&args, 0, "fromMillis")? else {
        return Ok(Item::Undefined);
    };
    let date = parse_date(&Value::from(ms as i64))?;
    format_with(date, str_arg(&args, 1, "fromMillis")?)
}

/// `$formatDate(date, pattern?)` with strftime patterns; RFC 3339 by default.
fn fn_format_date(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(v) = val(&args, 0) else {
        return Ok(Item::Undefined);
    };
    format_with(parse_date(v)?, str_arg(&args, 1, "formatDate")?)
}

/// `$dateAdd(date, amount, unit)`; negative amounts subtract.
fn fn_date_add(_: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(v) = val(&args, 0) else {
        return Ok(Item::Undefined);
    };
    let date = parse_date(v)?;
    let amount = num_arg(&args, 1, "dateAdd")?.unwrap_or(0.0) as i64;
    let unit = str_arg(&args, 2, "dateAdd")?.unwrap_or("days");

    let shifted = match unit.trim_end_matches('s') {
        "millisecond" => {
            TimeDelta::try_milliseconds(amount).and_then(|d| date.checked_add_signed(d))
        }
        "second" => TimeDelta::try_seconds(amount).and_then(|d| date.checked_add_signed(d)),
        "minute" => TimeDelta::try_minutes(amount).and_then(|d| date.checked_add_signed(d)),
        "hour" => TimeDelta::try_hours(amount).and_then(|d| date.checked_add_signed(d)),
        "day" => TimeDelta::try_days(amount).and_then(|d| date.checked_add_signed(d)),
        "week" => TimeDelta::try_weeks(amount).and_then(|d| date.checked_add_signed(d)),
        "month" => add_months(date, amount),
        "year" => amount.checked_mul(12).and_then(|m| add_months(date, m)),
        other => return Err(fail(format!("$dateAdd: unknown unit '{other}'"))),
    };
    let shifted = shifted.ok_or_else(|| fail("$dateAdd result is out of range"))?;
    str_item(format_timestamp(shifted))
}

fn add_months(date: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        date.checked_add_months(magnitude)
    } else {
        date.checked_sub_months(magnitude)
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

fn fn_node(interp: &Interpreter<'_>, args: Vec<Item>) -> Result<Item, EvalError> {
    let Some(name) = str_arg(&args, 0, "node")? else {
        return Ok(Item::Undefined);
    };
    Ok(interp.context().node(name).cloned().into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
