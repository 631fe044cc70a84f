//! Expression compiler.
//!
//! Turns structured filters, key conditions, updates, conditions and
//! projections into expression strings. User values never appear in the
//! text; they are bound to `:placeholders` and attribute names to
//! `#placeholders`, accumulated in one [`Placeholders`] per request.
//!
//! | use | names | values |
//! | --- | --- | --- |
//! | key condition | `#pk`, `#sk` | `:pk`, `:sk`, `:sk1`/`:sk2` |
//! | filter | `#f_<field>` | `:f1`, `:f2`, .. |
//! | update builder | `#u_<field>` | `:u1`, `:u2`, .. |
//! | builder conditions | `#c_<field>` | `:c1`, `:c2`, .. |
//! | field-map update | `#d_<field>` | `:d_<field>` |
//! | write conditions | `#w_<field>` | `:w1`, `:w2`, .. |
//! | projection | `#p_<field>` | |

mod condition;
mod key_condition;
mod placeholders;
mod projection;
mod update;

pub use condition::{
    compile_filter, Condition, Filter, Joiner, Operator, RawExpression, WriteCondition,
    MAX_IN_VALUES,
};
pub(crate) use condition::{compile_chain, version_field, PendingCondition};
pub use key_condition::{compile_key_condition, SortKeyCondition};
pub use placeholders::Placeholders;
pub use projection::compile_projection;
pub use update::{compile_field_updates, compile_update, UpdateAction};
