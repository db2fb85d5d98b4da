use rand::Rng;
use serde::Deserialize;

/// Integer parameter as written in a rule file: a literal, a `[min, max]`
/// pair, or a string (decimal, `a + b` or `a * b`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawInt {
    Literal(i64),
    Range(Vec<i64>),
    Text(String),
}

/// Float parameter as written in a rule file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawFloat {
    Literal(f64),
    Range(Vec<f64>),
}

/// A validated integer parameter. Ranges are drawn fresh on every resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntParam {
    Fixed(i64),
    Range { min: i64, max: i64 },
}

impl IntParam {
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> i64 {
        match *self {
            IntParam::Fixed(v) => v,
            IntParam::Range { min, max } => rng.gen_range(min..=max),
        }
    }

    pub fn range(a: i64, b: i64) -> Self {
        if a == b {
            IntParam::Fixed(a)
        } else {
            IntParam::Range {
                min: a.min(b),
                max: a.max(b),
            }
        }
    }
}

impl TryFrom<&RawInt> for IntParam {
    type Error = String;

    fn try_from(raw: &RawInt) -> Result<Self, Self::Error> {
        match raw {
            RawInt::Literal(v) => Ok(IntParam::Fixed(*v)),
            RawInt::Range(values) => match values.as_slice() {
                [a, b, ..] => Ok(IntParam::range(*a, *b)),
                [single] => Ok(IntParam::Fixed(*single)),
                [] => Err("empty range, expected [min, max]".to_string()),
            },
            RawInt::Text(text) => eval_int_expression(text).map(IntParam::Fixed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FloatParam {
    Fixed(f64),
    Range { min: f64, max: f64 },
}

impl FloatParam {
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            FloatParam::Fixed(v) => v,
            FloatParam::Range { min, max } => rng.gen_range(min..=max),
        }
    }
}

impl TryFrom<&RawFloat> for FloatParam {
    type Error = String;

    fn try_from(raw: &RawFloat) -> Result<Self, Self::Error> {
        let check = |v: f64| {
            if v.is_finite() {
                Ok(v)
            } else {
                Err(format!("non-finite value {}", v))
            }
        };
        match raw {
            RawFloat::Literal(v) => Ok(FloatParam::Fixed(check(*v)?)),
            RawFloat::Range(values) => match values.as_slice() {
                [a, b, ..] => {
                    let (a, b) = (check(*a)?, check(*b)?);
                    if a == b {
                        Ok(FloatParam::Fixed(a))
                    } else {
                        Ok(FloatParam::Range {
                            min: a.min(b),
                            max: a.max(b),
                        })
                    }
                }
                [single] => Ok(FloatParam::Fixed(check(*single)?)),
                [] => Err("empty range, expected [min, max]".to_string()),
            },
        }
    }
}

/// Evaluate a decimal literal, a sum (`100 + 50`) or a product (`20 * 5`).
/// Mixed operators are rejected.
pub fn eval_int_expression(text: &str) -> Result<i64, String> {
    let text = text.trim();
    let parse = |term: &str| {
        term.trim()
            .parse::<i64>()
            .map_err(|_| format!("'{}' is not an integer expression", text))
    };

    let has_sum = text.contains('+');
    let has_product = text.contains('*');
    match (has_sum, has_product) {
        (true, true) => Err(format!("'{}' mixes + and *, use one operator", text)),
        (true, false) => text
            .split('+')
            .try_fold(0i64, |acc, term| -> Result<i64, String> {
                Ok(acc.saturating_add(parse(term)?))
            }),
        (false, true) => text
            .split('*')
            .try_fold(1i64, |acc, term| -> Result<i64, String> {
                Ok(acc.saturating_mul(parse(term)?))
            }),
        (false, false) => parse(text),
    }
}

/// A trigger probability in [0, 1]. Out-of-range input is clamped, NaN is never.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Chance(f64);

impl Chance {
    pub const NEVER: Chance = Chance(0.0);
    pub const ALWAYS: Chance = Chance(1.0);

    pub fn new(p: f64) -> Self {
        if p.is_nan() {
            Chance::NEVER
        } else {
            Chance(p.clamp(0.0, 1.0))
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        rng.gen_bool(self.0)
    }
}

impl Default for Chance {
    fn default() -> Self {
        Chance::ALWAYS
    }
}
