use crate::domain::resource::Range;
use crate::domain::schema::WidgetKind;
use crate::domain::{SqlValue, TableTree};
use crate::error::EngineError;

use super::{Frame, Step, Walk, CONTROL, CONTROL_SANS_NEWLINE};

fn rune_count(s: &str) -> i64 {
    s.chars().count() as i64
}

impl<'a> Walk<'a> {
    pub(super) fn string(&mut self, frame: &Frame<'a>, s: Option<&str>, tbl: &mut TableTree) -> Step<()> {
        let text = s.unwrap_or_default().trim();
        if !frame.ignore_validation {
            self.check_string(frame, text)?;
        }
        match s {
            None => self.column(frame, tbl, SqlValue::Null),
            Some(_) => self.column(frame, tbl, text),
        }
        Ok(())
    }

    /// Checks a trimmed string against the frame's field.
    pub(super) fn check_string(&self, frame: &Frame<'a>, s: &str) -> Step<()> {
        let f = frame.field()?;
        let src = &frame.src;

        if s.is_empty() {
            if !(f.optional || f.admin_only) {
                return Err(frame.reject(format!("Non-optional field {src:?} is empty.")));
            }
            if f.add > 0 {
                return Err(frame.reject(format!(
                    "Optional field {src:?} is a slice of strings that contains an empty string among its elements. \
                     An optional slice of strings should either contain no strings or non-empty strings."
                )));
            }
            return Ok(());
        }
        if f.admin_only && !self.admin() {
            return Err(frame.reject(format!("Admin only field {src:?} set by non-admin account.")));
        }
        if f.kind == WidgetKind::Textarea {
            if CONTROL_SANS_NEWLINE.is_match(s) {
                return Err(frame.reject(format!("Field {src:?} contains non-newline control character(s).")));
            }
        } else if CONTROL.is_match(s) {
            return Err(frame.reject(format!("Field {src:?} contains control character(s).")));
        }

        // Counting widgets bound the number of elements, not their length.
        if !(frame.element && f.kind.counts_elements()) {
            let n = rune_count(s);
            if n < f.min {
                return Err(frame.reject(format!("Min rune count of field {src:?} not met.")));
            }
            if f.max > 0 && n > f.max {
                return Err(frame.reject(format!("Max rune count of field {src:?} exceeded.")));
            }
        }

        for name in &f.validate {
            let re = self.pattern(name).ok_or_else(|| EngineError::UnknownValidator {
                path: src.clone(),
                name: name.clone(),
            })?;
            if !re.is_match(s) {
                return Err(frame.reject(format!("Field {src:?} failed regexp {name:?}.")));
            }
        }

        if f.constrains_values() && !f.in_values(s) {
            return Err(frame.reject(format!("Field {src:?} doesn't contain supplied value.")));
        }
        Ok(())
    }

    /// Integers and date-times. `None` is an SQL null.
    pub(super) fn int(&mut self, frame: &Frame<'a>, n: Option<i64>, tbl: &mut TableTree) -> Step<()> {
        if !frame.ignore_validation {
            let f = frame.field()?;
            let src = &frame.src;
            let v = n.unwrap_or(0);
            if v == 0 {
                if !f.optional {
                    return Err(frame.reject(format!("Non-optional field {src:?} is zero.")));
                }
                // Bounds apply to present values only.
                self.column(frame, tbl, n);
                return Ok(());
            }
            if f.admin_only && !self.admin() {
                return Err(frame.reject(format!("Admin only field {src:?} set by non-admin account.")));
            }
            if f.kind == WidgetKind::Number {
                if v < f.min {
                    return Err(frame.reject(format!("Field {src:?} is below the minimum of {}.", f.min)));
                }
                if f.max > 0 && v > f.max {
                    return Err(frame.reject(format!("Field {src:?} is above the maximum of {}.", f.max)));
                }
            }
        }
        self.column(frame, tbl, n);
        Ok(())
    }

    pub(super) fn float(&mut self, frame: &Frame<'a>, n: Option<f64>, tbl: &mut TableTree) -> Step<()> {
        if !frame.ignore_validation {
            let f = frame.field()?;
            let src = &frame.src;
            let v = n.unwrap_or(0.0);
            if v == 0.0 {
                if !f.optional {
                    return Err(frame.reject(format!("Non-optional field {src:?} is zero.")));
                }
                self.column(frame, tbl, n);
                return Ok(());
            }
            if f.admin_only && !self.admin() {
                return Err(frame.reject(format!("Admin only field {src:?} set by non-admin account.")));
            }
            if f.kind == WidgetKind::Number {
                if v < f.min as f64 {
                    return Err(frame.reject(format!("Field {src:?} is below the minimum of {}.", f.min)));
                }
                if f.max > 0 && v > f.max as f64 {
                    return Err(frame.reject(format!("Field {src:?} is above the maximum of {}.", f.max)));
                }
            }
        }
        self.column(frame, tbl, n);
        Ok(())
    }

    /// An admin-only flag left unset is stored as null.
    pub(super) fn bool(&mut self, frame: &Frame<'a>, b: Option<bool>, tbl: &mut TableTree) -> Step<()> {
        let mut value = b;
        if !frame.ignore_validation {
            let f = frame.field()?;
            if f.admin_only {
                if value == Some(true) && !self.admin() {
                    let src = &frame.src;
                    return Err(frame.reject(format!("Admin only field {src:?} set by non-admin account.")));
                }
                if value != Some(true) {
                    value = None;
                }
            }
        }
        self.column(frame, tbl, value);
        Ok(())
    }

    /// Two columns, `<field>_start` and `<field>_end`. An empty end takes
    /// the start's value.
    pub(super) fn range(&mut self, frame: &Frame<'a>, r: &Range, tbl: &mut TableTree) -> Step<()> {
        let start = r.start.trim();
        let end = match r.end.trim() {
            "" => start,
            end => end,
        };
        let name = frame.column();

        if !frame.ignore_validation {
            let f = frame.field()?;
            let src = &frame.src;
            if start.is_empty() && f.optional {
                if !frame.ignore_db {
                    tbl.safe_add(format!("{name}_start"), SqlValue::Null);
                    tbl.safe_add(format!("{name}_end"), SqlValue::Null);
                }
                return Ok(());
            }
            self.check_string(frame, start)?;
            self.check_string(frame, end)?;

            let position = |which: &str, value: &str| {
                f.position_of(value).ok_or_else(|| {
                    frame.reject(format!("Range type contains unknown {which} value for field {src:?}."))
                })
            };
            if position("start", start)? > position("end", end)? {
                return Err(frame.reject(format!("Range type has start greater than end for field {src:?}.")));
            }
        }

        if !frame.ignore_db {
            tbl.safe_add(format!("{name}_start"), start);
            tbl.safe_add(format!("{name}_end"), end);
        }
        Ok(())
    }
}
