mod common;

use common::*;
use proptest::prelude::*;
use quill_ast::Expr;
use quill_ast::sql::{OrderingTerm, Select};
use quill_testing::OWNER;
use quill_values::Value;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn order_by_puts_nulls_where_postgres_does(
        ages in prop::collection::vec(prop::option::of(-100i64..100), 0..12),
        descending in any::<bool>(),
    ) {
        let mut h = harness();
        h.execute(OWNER, &[users_table()]).unwrap().assert_ok();
        if !ages.is_empty() {
            let rows = ages
                .iter()
                .enumerate()
                .map(|(id, age)| vec![Expr::int(id as i64), Expr::text("n"), age.map_or_else(Expr::null, Expr::int)])
                .collect();
            h.execute(OWNER, &[sql(insert("users", &["id", "name", "age"], rows))]).unwrap().assert_ok();
        }

        let query = Select {
            order_by: vec![OrderingTerm {
                expr: Expr::column("age"),
                descending,
                nulls_first: None,
            }],
            ..select(&["age"], "users")
        };
        let out = h.execute("0xalice", &[sql(query)]).unwrap();

        let mut present: Vec<i64> = ages.iter().flatten().copied().collect();
        present.sort();
        let nulls = ages.len() - present.len();
        let mut expected: Vec<Value> = present.into_iter().map(Value::int).collect();
        if descending {
            expected.reverse();
            expected.splice(0..0, std::iter::repeat_n(Value::Int(None), nulls));
        } else {
            expected.extend(std::iter::repeat_n(Value::Int(None), nulls));
        }
        prop_assert_eq!(out.column("age"), expected);
    }
}
