//! Exact arithmetic over Kubernetes resource quantities.
//!
//! Quantities are parsed into an integer count of nano-units so that
//! `100m + 1.5` or `512Mi + 1Gi` add without floating point error. Sums are
//! written back in the notation of the accumulator's existing value.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::{
    crd::Job,
    job::priority::sort_by_priority,
    Error, Result,
};

/// Resource name to quantity, as found in container requests and limits.
pub type ResourceList = BTreeMap<String, Quantity>;

const NANO: i128 = 1_000_000_000;

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 1),
    ("Mi", 2),
    ("Gi", 3),
    ("Ti", 4),
    ("Pi", 5),
    ("Ei", 6),
];

// Powers of ten relative to the base unit
const DECIMAL_SUFFIXES: [(&str, i32); 10] = [
    ("n", -9),
    ("u", -6),
    ("m", -3),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
    ("", 0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityFormat {
    BinarySI,
    DecimalSI,
}

/// A parsed quantity held as nano-units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ParsedQuantity {
    nanos: i128,
}

impl ParsedQuantity {
    pub fn parse(raw: &str) -> Result<(Self, QuantityFormat)> {
        let value = raw.trim();
        let invalid = || Error::Validation(format!("invalid quantity '{}'", raw));

        if value.is_empty() {
            return Err(invalid());
        }

        let (number, multiplier, format) = split_suffix(value).ok_or_else(invalid)?;
        let nanos = scale_decimal(number, multiplier).ok_or_else(invalid)?;
        Ok((Self { nanos }, format))
    }

    pub fn from_nanos(nanos: i128) -> Self {
        Self { nanos }
    }

    pub fn nanos(&self) -> i128 {
        self.nanos
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.nanos.checked_add(other.nanos).map(Self::from_nanos)
    }

    /// Canonical string in `format`, falling back to decimal notation when
    /// the value is not a whole number of binary units.
    pub fn to_string_in(&self, format: QuantityFormat) -> String {
        if format == QuantityFormat::BinarySI && self.nanos % NANO == 0 {
            let units = self.nanos / NANO;
            if units != 0 {
                for (suffix, power) in BINARY_SUFFIXES.iter().rev() {
                    let base = 1024_i128.pow(*power);
                    if units % base == 0 {
                        return format!("{}{}", units / base, suffix);
                    }
                }
            }
            return units.to_string();
        }

        if self.nanos == 0 {
            return "0".to_string();
        }
        let mut best = ("n", 1_i128);
        for (suffix, exponent) in DECIMAL_SUFFIXES.iter() {
            let divisor = 10_i128.pow((exponent + 9) as u32);
            if self.nanos % divisor == 0 && divisor > best.1 {
                best = (*suffix, divisor);
            }
        }
        format!("{}{}", self.nanos / best.1, best.0)
    }
}

/// Splits `value` into its numeric part, the multiplier of its suffix
/// expressed in nano-units, and the notation family.
fn split_suffix(value: &str) -> Option<(&str, i128, QuantityFormat)> {
    for (suffix, power) in BINARY_SUFFIXES.iter() {
        if let Some(number) = value.strip_suffix(suffix) {
            return Some((number, 1024_i128.pow(*power) * NANO, QuantityFormat::BinarySI));
        }
    }

    // Exponent notation such as 1e3 or 5E-3
    if let Some(pos) = value.find(|c: char| c == 'e' || c == 'E') {
        let (number, exponent) = (&value[..pos], &value[pos + 1..]);
        if !number.is_empty() && !exponent.is_empty() {
            if let Ok(exponent) = exponent.parse::<i32>() {
                let shifted = exponent + 9;
                if !(0..=27).contains(&shifted) {
                    return None;
                }
                return Some((number, 10_i128.pow(shifted as u32), QuantityFormat::DecimalSI));
            }
        }
    }

    for (suffix, exponent) in DECIMAL_SUFFIXES.iter() {
        if suffix.is_empty() {
            continue;
        }
        if let Some(number) = value.strip_suffix(suffix) {
            return Some((number, 10_i128.pow((exponent + 9) as u32), QuantityFormat::DecimalSI));
        }
    }

    Some((value, NANO, QuantityFormat::DecimalSI))
}

/// Multiplies a signed decimal literal by `multiplier`, requiring an exact
/// integer result.
fn scale_decimal(number: &str, multiplier: i128) -> Option<i128> {
    let (negative, digits) = match number.as_bytes().first()? {
        b'-' => (true, &number[1..]),
        b'+' => (false, &number[1..]),
        _ => (false, number),
    };

    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut mantissa: i128 = 0;
    for b in whole.bytes().chain(fraction.bytes()) {
        mantissa = mantissa.checked_mul(10)?.checked_add(i128::from(b - b'0'))?;
    }
    let scale = 10_i128.checked_pow(fraction.len() as u32)?;
    let product = mantissa.checked_mul(multiplier)?;
    if product % scale != 0 {
        return None;
    }

    let magnitude = product / scale;
    Some(if negative { -magnitude } else { magnitude })
}

/// Adds `quantity` into the entry for `name`, creating it if absent.
fn add_quantity(list: &mut ResourceList, name: &str, quantity: &Quantity) -> Result<()> {
    match list.get(name) {
        None => {
            list.insert(name.to_string(), quantity.clone());
        }
        Some(current) => {
            let (lhs, format) = ParsedQuantity::parse(&current.0)?;
            let (rhs, _) = ParsedQuantity::parse(&quantity.0)?;
            let sum = lhs.checked_add(rhs).ok_or_else(|| {
                Error::Validation(format!("quantity overflow adding {} to {}", quantity.0, current.0))
            })?;
            list.insert(name.to_string(), Quantity(sum.to_string_in(format)));
        }
    }
    Ok(())
}

/// Adds every request into `list`, then seeds resources that only appear in
/// `limits` with the limit value, since an omitted request defaults to its
/// limit.
pub fn add_resource_list(list: &mut ResourceList, requests: &ResourceList, limits: &ResourceList) -> Result<()> {
    for (name, quantity) in requests {
        add_quantity(list, name, quantity)?;
    }

    for (name, quantity) in limits {
        if !list.contains_key(name) {
            list.insert(name.clone(), quantity.clone());
        }
    }
    Ok(())
}

/// Resources needed to run the job's `minAvailable` pods, taking pods from
/// the highest priority tasks first.
pub fn min_resources(job: &Job) -> Result<ResourceList> {
    let mut total = ResourceList::new();
    let mut remaining = job.min_available();

    for task in sort_by_priority(&job.spec.tasks) {
        let containers = task
            .template
            .spec
            .as_ref()
            .map(|spec| spec.containers.as_slice())
            .unwrap_or_default();

        for _ in 0..task.replicas {
            if remaining <= 0 {
                return Ok(total);
            }
            for container in containers {
                let resources = container.resources.clone().unwrap_or_default();
                add_resource_list(
                    &mut total,
                    &resources.requests.unwrap_or_default(),
                    &resources.limits.unwrap_or_default(),
                )?;
            }
            remaining -= 1;
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{JobSpec, TaskSpec};
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, ResourceRequirements};

    fn list(entries: &[(&str, &str)]) -> ResourceList {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
            .collect()
    }

    #[test]
    fn test_request_wins_over_limit() {
        let mut acc = ResourceList::new();
        add_resource_list(&mut acc, &list(&[("cpu", "1")]), &list(&[("cpu", "2"), ("memory", "4")])).unwrap();
        assert_eq!(acc, list(&[("cpu", "1"), ("memory", "4")]));
    }

    #[test]
    fn test_requests_accumulate_exactly() {
        let mut acc = list(&[("cpu", "100m"), ("memory", "512Mi")]);
        add_resource_list(&mut acc, &list(&[("cpu", "1.5"), ("memory", "1Gi")]), &ResourceList::new()).unwrap();
        assert_eq!(acc, list(&[("cpu", "1600m"), ("memory", "1536Mi")]));

        add_resource_list(&mut acc, &list(&[("cpu", "400m"), ("memory", "512Mi")]), &ResourceList::new()).unwrap();
        assert_eq!(acc, list(&[("cpu", "2"), ("memory", "2Gi")]));
    }

    #[test]
    fn test_limit_does_not_override_existing_entry() {
        let mut acc = list(&[("memory", "1Gi")]);
        add_resource_list(&mut acc, &ResourceList::new(), &list(&[("memory", "8Gi")])).unwrap();
        assert_eq!(acc, list(&[("memory", "1Gi")]));
    }

    #[test]
    fn test_invalid_quantity_is_an_error() {
        let mut acc = list(&[("cpu", "1")]);
        assert!(add_resource_list(&mut acc, &list(&[("cpu", "lots")]), &ResourceList::new()).is_err());
    }

    #[test]
    fn test_parse_notations() {
        let parse = |s: &str| ParsedQuantity::parse(s).unwrap().0.nanos();
        assert_eq!(parse("1"), NANO);
        assert_eq!(parse("250m"), NANO / 4);
        assert_eq!(parse("0.5"), NANO / 2);
        assert_eq!(parse("2k"), 2000 * NANO);
        assert_eq!(parse("1Ki"), 1024 * NANO);
        assert_eq!(parse("1e3"), 1000 * NANO);
        assert_eq!(parse("10n"), 10);
        assert!(ParsedQuantity::parse("").is_err());
        assert!(ParsedQuantity::parse("1.5n").is_err());
        assert!(ParsedQuantity::parse("Mi").is_err());
    }

    #[test]
    fn test_format_round_trips_canonical_values() {
        let fmt = |s: &str| {
            let (q, format) = ParsedQuantity::parse(s).unwrap();
            q.to_string_in(format)
        };
        assert_eq!(fmt("1500m"), "1500m");
        assert_eq!(fmt("2000"), "2k");
        assert_eq!(fmt("1024Mi"), "1Gi");
        assert_eq!(fmt("0"), "0");
    }

    fn task(name: &str, replicas: i32, priority: i32, cpu: &str) -> TaskSpec {
        TaskSpec {
            name: name.to_string(),
            replicas,
            priority,
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "main".to_string(),
                        resources: Some(ResourceRequirements {
                            requests: Some(list(&[("cpu", cpu)])),
                            limits: Some(list(&[("memory", "1Gi")])),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_min_resources_prefers_high_priority_tasks() {
        let mut job = Job::new(
            "demo",
            JobSpec {
                tasks: vec![task("worker", 4, 1, "1"), task("ps", 1, 10, "500m")],
                ..Default::default()
            },
        );
        job.spec.min_available = Some(3);

        let total = min_resources(&job).unwrap();
        assert_eq!(total, list(&[("cpu", "2500m"), ("memory", "1Gi")]));
    }
}
