use std::collections::HashSet;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::executor::{Expr, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Average,
    Count,
    CountColumn,
    CountColumnDistinct,
    Max,
    Min,
    Sum,
}

/// One aggregate to compute: the function, its argument (absent for
/// COUNT(*)), and the output column name both plans agree on.
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub function: AggregateFunction,
    pub arg: Option<Expr>,
    pub output: String,
    pub distinct: bool,
}

/// Per-group running state. The Aggregate operator evaluates the
/// argument per row and feeds it in; `finalize` produces the value.
pub trait Accumulator {
    fn update(&mut self, value: &Value);
    fn finalize(&self) -> Value;
}

impl AggregateSpec {
    pub fn create_accumulator(&self) -> Box<dyn Accumulator> {
        let inner: Box<dyn Accumulator> = match self.function {
            AggregateFunction::Count => Box::new(CountAcc { n: 0, non_null_only: false }),
            AggregateFunction::CountColumn | AggregateFunction::CountColumnDistinct => {
                Box::new(CountAcc { n: 0, non_null_only: true })
            }
            AggregateFunction::Sum => Box::new(SumAcc::default()),
            AggregateFunction::Average => Box::new(AvgAcc::default()),
            AggregateFunction::Max => Box::new(MinMaxAcc { best: Value::Null, want_max: true }),
            AggregateFunction::Min => Box::new(MinMaxAcc { best: Value::Null, want_max: false }),
        };
        if self.distinct || self.function == AggregateFunction::CountColumnDistinct {
            Box::new(DistinctAcc { seen: HashSet::new(), inner })
        } else {
            inner
        }
    }
}

struct CountAcc {
    n: i64,
    non_null_only: bool,
}

impl Accumulator for CountAcc {
    fn update(&mut self, value: &Value) {
        if !self.non_null_only || !value.is_null() {
            self.n += 1;
        }
    }
    fn finalize(&self) -> Value {
        Value::Int(self.n)
    }
}

#[derive(Default)]
struct SumAcc {
    sum: Option<Decimal>,
    float: bool,
}

impl Accumulator for SumAcc {
    fn update(&mut self, value: &Value) {
        let d = match value.clone().unwrap_platform() {
            Value::Null => return,
            Value::Int(i) => Decimal::from(i),
            Value::Decimal(d) => d,
            Value::Float(f) => {
                self.float = true;
                match Decimal::from_f64(f) {
                    Some(d) => d,
                    None => return,
                }
            }
            _ => return,
        };
        self.sum = Some(self.sum.unwrap_or_default() + d);
    }
    fn finalize(&self) -> Value {
        match self.sum {
            None => Value::Null,
            Some(d) if self.float => Value::Float(d.to_f64().unwrap_or(f64::NAN)),
            Some(d) => Value::Decimal(d),
        }
    }
}

/// Average keeps a decimal sum and a count.
#[derive(Default)]
struct AvgAcc {
    sum: Decimal,
    cnt: i64,
}

impl Accumulator for AvgAcc {
    fn update(&mut self, value: &Value) {
        let d = match value.clone().unwrap_platform() {
            Value::Null => return,
            Value::Int(i) => Decimal::from(i),
            Value::Decimal(d) => d,
            Value::Float(f) => match Decimal::from_f64(f) {
                Some(d) => d,
                None => return,
            },
            _ => return,
        };
        self.sum += d;
        self.cnt += 1;
    }
    fn finalize(&self) -> Value {
        if self.cnt == 0 {
            Value::Null
        } else {
            self.sum
                .checked_div(Decimal::from(self.cnt))
                .map(Value::Decimal)
                .unwrap_or(Value::Null)
        }
    }
}

struct MinMaxAcc {
    best: Value,
    want_max: bool,
}

impl Accumulator for MinMaxAcc {
    fn update(&mut self, value: &Value) {
        if value.is_null() {
            return;
        }
        if self.best.is_null() {
            self.best = value.clone().unwrap_platform();
            return;
        }
        let ord = value.sql_cmp(&self.best);
        let better = match ord {
            Some(o) if self.want_max => o.is_gt(),
            Some(o) => o.is_lt(),
            None => false,
        };
        if better {
            self.best = value.clone().unwrap_platform();
        }
    }
    fn finalize(&self) -> Value {
        self.best.clone()
    }
}

struct DistinctAcc {
    seen: HashSet<String>,
    inner: Box<dyn Accumulator>,
}

impl Accumulator for DistinctAcc {
    fn update(&mut self, value: &Value) {
        if self.seen.insert(value.group_key()) {
            self.inner.update(value);
        }
    }
    fn finalize(&self) -> Value {
        self.inner.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(function: AggregateFunction, distinct: bool) -> AggregateSpec {
        AggregateSpec { function, arg: None, output: "agg1".into(), distinct }
    }

    #[test]
    fn sum_skips_nulls_and_stays_null_when_empty() {
        let mut acc = spec(AggregateFunction::Sum, false).create_accumulator();
        acc.update(&Value::Null);
        assert_eq!(acc.finalize(), Value::Null);
        acc.update(&Value::Int(2));
        acc.update(&Value::Null);
        acc.update(&Value::Int(3));
        assert_eq!(acc.finalize(), Value::Decimal(Decimal::from(5)));
    }

    #[test]
    fn average_is_decimal_sum_over_count() {
        let mut acc = spec(AggregateFunction::Average, false).create_accumulator();
        acc.update(&Value::Int(1));
        acc.update(&Value::Int(2));
        assert_eq!(acc.finalize(), Value::Decimal(Decimal::new(15, 1)));
    }

    #[test]
    fn count_star_counts_nulls_count_column_does_not() {
        let mut star = spec(AggregateFunction::Count, false).create_accumulator();
        let mut col = spec(AggregateFunction::CountColumn, false).create_accumulator();
        for v in [Value::Int(1), Value::Null, Value::Int(2)] {
            star.update(&v);
            col.update(&v);
        }
        assert_eq!(star.finalize(), Value::Int(3));
        assert_eq!(col.finalize(), Value::Int(2));
    }

    #[test]
    fn count_distinct_folds_string_case() {
        let mut acc = spec(AggregateFunction::CountColumnDistinct, false).create_accumulator();
        acc.update(&Value::String("Data".into()));
        acc.update(&Value::String("DATA".into()));
        acc.update(&Value::String("other".into()));
        assert_eq!(acc.finalize(), Value::Int(2));
    }

    #[test]
    fn min_max_ignore_nulls() {
        let mut mx = spec(AggregateFunction::Max, false).create_accumulator();
        mx.update(&Value::Null);
        mx.update(&Value::Int(3));
        mx.update(&Value::Int(7));
        assert_eq!(mx.finalize(), Value::Int(7));

        let mut mn = spec(AggregateFunction::Min, false).create_accumulator();
        mn.update(&Value::Int(3));
        mn.update(&Value::Null);
        assert_eq!(mn.finalize(), Value::Int(3));
    }
}
