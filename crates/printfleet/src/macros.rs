/// Merges every listed field of `$fragment` into `$target`.
///
/// Each field type must implement [`Merge`](crate::telemetry::Merge).
///
/// # Example
///
/// ```rust,ignore
/// merge_fields!(self, fragment, [bed_temper, gcode_state, ams]);
/// ```
macro_rules! merge_fields {
    ($target:ident, $fragment:ident, [$($field:ident),* $(,)?]) => {
        $(
            $crate::telemetry::Merge::merge(&mut $target.$field, $fragment.$field);
        )*
    };
}

/// Implements [`Merge`](crate::telemetry::Merge) for integer scalars: zero
/// is the empty value and never overwrites.
macro_rules! merge_integers {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::telemetry::Merge for $ty {
                #[inline]
                fn merge(&mut self, fragment: Self) {
                    if fragment != 0 {
                        *self = fragment;
                    }
                }
            }
        )*
    };
}

pub(crate) use merge_fields;
pub(crate) use merge_integers;
