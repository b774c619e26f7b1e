//! Calendar date and datetime values: `Date` stores a day count and
//! `Datetime` a microsecond tick count, both against the proleptic
//! Gregorian epoch 1970-01-01, the same representation numpy's
//! `datetime64[D]`/`datetime64[us]` use.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::assign::ErrorMode;
use crate::compare::ComparisonOp;
use crate::error::{Error, Result};
use crate::kernel::{KernelBuilder, KernelFn, KernelPrefix, RequestMode};
use crate::memory_block::MemoryBlockRef;
use crate::shape::Shape;
use crate::structure::StructField;
use crate::type_desc::{Kind, Type, TypeFlags, TypeId, TypeRef};

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i32, month: i32) -> i32 {
    const DAYS: [i32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    if month == 2 && is_leap_year(year) {
        29
    } else {
        DAYS[(month - 1) as usize]
    }
}

/// Days since the epoch for `2000-03-01`, chosen (as in most proleptic
/// Gregorian day-count algorithms) so that March starts each internal
/// "year" and the leap day falls at the very end of it.
fn days_from_civil(year: i32, month: i32, day: i32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year } as i64;
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64;
    let mp = ((month as i64 + 9) % 12) as i64;
    let doy = (153 * mp + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

fn civil_from_days(z: i64) -> (i32, i32, i32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as i32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as i32;
    let y = if m <= 2 { y + 1 } else { y } as i32;
    (y, m, d)
}

fn normalize_field(value: i32, max: i32) -> i32 {
    if value < 0 {
        max + value + 1
    } else {
        value
    }
}

/// A calendar date, stored as a signed day count from 1970-01-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Date {
    days: i32,
}

impl Date {
    pub fn from_ymd(year: i32, month: i32, day: i32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(Error::Value(format!("month {month} out of range")));
        }
        if day < 1 || day > days_in_month(year, month) {
            return Err(Error::Value(format!("day {day} out of range for {year}-{month:02}")));
        }
        Ok(Self {
            days: days_from_civil(year, month, day) as i32,
        })
    }

    pub fn year_month_day(&self) -> (i32, i32, i32) {
        civil_from_days(self.days as i64)
    }

    pub fn from_days(days: i32) -> Self {
        Self { days }
    }

    pub fn days(&self) -> i32 {
        self.days
    }

    /// Returns a new date with the given fields overridden. A negative
    /// `month`/`day` counts back from the field's maximum valid value for
    /// the resulting date (`-1` is "the last one"), the way a negative
    /// sequence index counts back from the end.
    pub fn replace(&self, year: Option<i32>, month: Option<i32>, day: Option<i32>) -> Result<Self> {
        let (cur_year, cur_month, _) = self.year_month_day();
        let new_year = year.unwrap_or(cur_year);
        let new_month = match month {
            Some(m) => normalize_field(m, 12),
            None => cur_month,
        };
        if !(1..=12).contains(&new_month) {
            return Err(Error::Value(format!("month {new_month} out of range")));
        }
        let new_day = match day {
            Some(d) => normalize_field(d, days_in_month(new_year, new_month)),
            None => self.year_month_day().2,
        };
        Self::from_ymd(new_year, new_month, new_day)
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (y, m, d) = self.year_month_day();
        write!(f, "{y:04}-{m:02}-{d:02}")
    }
}

/// A calendar date and time of day, stored as microseconds since the
/// epoch `1970-01-01T00:00:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Datetime {
    micros: i64,
}

const MICROS_PER_DAY: i64 = 86_400_000_000;

impl Datetime {
    pub fn from_ticks(micros: i64) -> Self {
        Self { micros }
    }

    pub fn ticks(&self) -> i64 {
        self.micros
    }

    pub fn date(&self) -> Date {
        Date::from_days(self.micros.div_euclid(MICROS_PER_DAY) as i32)
    }

    pub fn time_of_day_micros(&self) -> i64 {
        self.micros.rem_euclid(MICROS_PER_DAY)
    }
}

impl fmt::Display for Datetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tod = self.time_of_day_micros();
        let (h, rem) = (tod / 3_600_000_000, tod % 3_600_000_000);
        let (min, rem) = (rem / 60_000_000, rem % 60_000_000);
        let (sec, us) = (rem / 1_000_000, rem % 1_000_000);
        write!(f, "{}T{h:02}:{min:02}:{sec:02}.{us:06}", self.date())
    }
}

unsafe fn date_memcpy(dst: *mut u8, src: *const u8, _kernel: *mut KernelPrefix) {
    unsafe { std::ptr::copy_nonoverlapping(src, dst, 4) }
}
unsafe fn datetime_memcpy(dst: *mut u8, src: *const u8, _kernel: *mut KernelPrefix) {
    unsafe { std::ptr::copy_nonoverlapping(src, dst, 8) }
}
unsafe fn date_compare(lhs: *const u8, rhs: *const u8, kernel: *mut KernelPrefix) -> bool {
    unsafe {
        let op = (*(kernel as *const OpPrefix)).op;
        let a = i32::from_le_bytes(std::slice::from_raw_parts(lhs, 4).try_into().unwrap());
        let b = i32::from_le_bytes(std::slice::from_raw_parts(rhs, 4).try_into().unwrap());
        apply_op(op, a, b)
    }
}
unsafe fn datetime_compare(lhs: *const u8, rhs: *const u8, kernel: *mut KernelPrefix) -> bool {
    unsafe {
        let op = (*(kernel as *const OpPrefix)).op;
        let a = i64::from_le_bytes(std::slice::from_raw_parts(lhs, 8).try_into().unwrap());
        let b = i64::from_le_bytes(std::slice::from_raw_parts(rhs, 8).try_into().unwrap());
        apply_op(op, a, b)
    }
}

fn apply_op<T: PartialOrd>(op: ComparisonOp, a: T, b: T) -> bool {
    match op {
        ComparisonOp::Lt => a < b,
        ComparisonOp::Le => a <= b,
        ComparisonOp::Eq => a == b,
        ComparisonOp::Ne => a != b,
        ComparisonOp::Ge => a >= b,
        ComparisonOp::Gt => a > b,
    }
}

#[repr(C)]
struct OpPrefix {
    prefix: KernelPrefix,
    op: ComparisonOp,
}

#[derive(Debug)]
pub struct DateType;

impl Type for DateType {
    fn type_id(&self) -> TypeId {
        TypeId::Date
    }
    fn kind(&self) -> Kind {
        Kind::Datetime
    }
    fn data_size(&self) -> usize {
        4
    }
    fn data_alignment(&self) -> usize {
        4
    }
    fn metadata_size(&self) -> usize {
        0
    }
    fn flags(&self) -> TypeFlags {
        TypeFlags::SCALAR | TypeFlags::ZERO_INIT
    }
    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("date")
    }
    fn print_data(&self, f: &mut fmt::Formatter<'_>, _metadata: &[u8], data: &[u8]) -> fmt::Result {
        let days = i32::from_le_bytes(data[..4].try_into().unwrap());
        write!(f, "{}", Date::from_days(days))
    }
    fn equal(&self, other: &dyn Type) -> bool {
        other.as_any().downcast_ref::<DateType>().is_some()
    }
    fn is_lossless_assignment_from(&self, src: &TypeRef) -> bool {
        (src.extended().and_then(|t| t.as_any().downcast_ref::<DateType>())).is_some()
    }
    fn metadata_default_construct(&self, _buf: &mut [u8], _shape: &Shape) -> Result<()> {
        Ok(())
    }
    fn metadata_copy_construct(
        &self,
        _dst: &mut [u8],
        _src: &[u8],
        _embedded_ref: &MemoryBlockRef,
    ) -> Result<()> {
        Ok(())
    }
    fn metadata_reset(&self, _buf: &mut [u8]) -> Result<()> {
        Ok(())
    }
    fn metadata_destruct(&self, _buf: &mut [u8]) {}
    fn get_shape(&self) -> Shape {
        Shape::scalar()
    }
    fn make_assignment_kernel(
        &self,
        builder: &mut KernelBuilder,
        offset: usize,
        _dst_meta: &[u8],
        src_tp: &TypeRef,
        _src_meta: &[u8],
        _request: RequestMode,
        _error_mode: ErrorMode,
    ) -> Result<usize> {
        let matches_date = src_tp
            .extended()
            .and_then(|t| t.as_any().downcast_ref::<DateType>())
            .is_some();
        let matches_days = matches!(src_tp, TypeRef::Builtin(TypeId::Int32));
        if !(matches_date || matches_days) {
            return Err(crate::error::unassignable(&TypeRef::Extended(Arc::new(DateType)), src_tp));
        }
        builder.append_prefix(KernelPrefix {
            kernel_fn: KernelFn::Single(date_memcpy),
            drop_fn: None,
        });
        let _ = offset;
        Ok(builder.len())
    }
    fn make_comparison_kernel(
        &self,
        builder: &mut KernelBuilder,
        offset: usize,
        rhs_tp: &TypeRef,
        _rhs_meta: &[u8],
        op: ComparisonOp,
    ) -> Result<usize> {
        let is_date = rhs_tp
            .extended()
            .and_then(|t| t.as_any().downcast_ref::<DateType>())
            .is_some();
        if !is_date {
            return Err(Error::NotComparable);
        }
        builder.append_prefix(OpPrefix {
            prefix: KernelPrefix {
                kernel_fn: KernelFn::Compare(date_compare),
                drop_fn: None,
            },
            op,
        });
        let _ = offset;
        Ok(builder.len())
    }
    fn struct_fields(&self) -> Option<&[StructField]> {
        None
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct DatetimeType;

impl Type for DatetimeType {
    fn type_id(&self) -> TypeId {
        TypeId::Datetime
    }
    fn kind(&self) -> Kind {
        Kind::Datetime
    }
    fn data_size(&self) -> usize {
        8
    }
    fn data_alignment(&self) -> usize {
        8
    }
    fn metadata_size(&self) -> usize {
        0
    }
    fn flags(&self) -> TypeFlags {
        TypeFlags::SCALAR | TypeFlags::ZERO_INIT
    }
    fn print_type(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("datetime")
    }
    fn print_data(&self, f: &mut fmt::Formatter<'_>, _metadata: &[u8], data: &[u8]) -> fmt::Result {
        let micros = i64::from_le_bytes(data[..8].try_into().unwrap());
        write!(f, "{}", Datetime::from_ticks(micros))
    }
    fn equal(&self, other: &dyn Type) -> bool {
        other.as_any().downcast_ref::<DatetimeType>().is_some()
    }
    fn is_lossless_assignment_from(&self, src: &TypeRef) -> bool {
        src.extended()
            .and_then(|t| t.as_any().downcast_ref::<DatetimeType>())
            .is_some()
    }
    fn metadata_default_construct(&self, _buf: &mut [u8], _shape: &Shape) -> Result<()> {
        Ok(())
    }
    fn metadata_copy_construct(
        &self,
        _dst: &mut [u8],
        _src: &[u8],
        _embedded_ref: &MemoryBlockRef,
    ) -> Result<()> {
        Ok(())
    }
    fn metadata_reset(&self, _buf: &mut [u8]) -> Result<()> {
        Ok(())
    }
    fn metadata_destruct(&self, _buf: &mut [u8]) {}
    fn get_shape(&self) -> Shape {
        Shape::scalar()
    }
    fn make_assignment_kernel(
        &self,
        builder: &mut KernelBuilder,
        offset: usize,
        _dst_meta: &[u8],
        src_tp: &TypeRef,
        _src_meta: &[u8],
        _request: RequestMode,
        _error_mode: ErrorMode,
    ) -> Result<usize> {
        let matches_datetime = src_tp
            .extended()
            .and_then(|t| t.as_any().downcast_ref::<DatetimeType>())
            .is_some();
        let matches_ticks = matches!(src_tp, TypeRef::Builtin(TypeId::Int64));
        if !(matches_datetime || matches_ticks) {
            return Err(crate::error::unassignable(
                &TypeRef::Extended(Arc::new(DatetimeType)),
                src_tp,
            ));
        }
        builder.append_prefix(KernelPrefix {
            kernel_fn: KernelFn::Single(datetime_memcpy),
            drop_fn: None,
        });
        let _ = offset;
        Ok(builder.len())
    }
    fn make_comparison_kernel(
        &self,
        builder: &mut KernelBuilder,
        offset: usize,
        rhs_tp: &TypeRef,
        _rhs_meta: &[u8],
        op: ComparisonOp,
    ) -> Result<usize> {
        let is_datetime = rhs_tp
            .extended()
            .and_then(|t| t.as_any().downcast_ref::<DatetimeType>())
            .is_some();
        if !is_datetime {
            return Err(Error::NotComparable);
        }
        builder.append_prefix(OpPrefix {
            prefix: KernelPrefix {
                kernel_fn: KernelFn::Compare(datetime_compare),
                drop_fn: None,
            },
            op,
        });
        let _ = offset;
        Ok(builder.len())
    }
    fn struct_fields(&self) -> Option<&[StructField]> {
        None
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn make_date() -> TypeRef {
    TypeRef::Extended(Arc::new(DateType))
}

pub fn make_datetime() -> TypeRef {
    TypeRef::Extended(Arc::new(DatetimeType))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_with_negative_fields_counts_from_the_end() {
        let d = Date::from_ymd(2013, 2, 28).unwrap();
        let replaced = d.replace(Some(2000), Some(-1), Some(-1)).unwrap();
        assert_eq!(replaced.year_month_day(), (2000, 12, 31));
    }

    #[test]
    fn leap_day_round_trips_through_day_count() {
        let d = Date::from_ymd(2024, 2, 29).unwrap();
        assert_eq!(Date::from_days(d.days()).year_month_day(), (2024, 2, 29));
    }

    #[test]
    fn invalid_day_for_month_is_rejected() {
        assert!(Date::from_ymd(2023, 2, 29).is_err());
    }

    #[test]
    fn datetime_splits_into_date_and_time_of_day() {
        let dt = Datetime::from_ticks(1 * MICROS_PER_DAY + 3_661_000_000);
        assert_eq!(dt.date().year_month_day(), (1970, 1, 2));
        assert_eq!(dt.time_of_day_micros(), 3_661_000_000);
    }

    #[test]
    fn display_formats_iso8601() {
        let dt = Datetime::from_ticks(3_661_000_000);
        assert_eq!(dt.to_string(), "1970-01-01T01:01:01.000000");
    }
}
