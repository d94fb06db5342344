mod common;

use common::*;
use pretty_assertions::assert_eq;
use quill_ast::action::ReturnValue;
use quill_ast::ddl::ColumnDef;
use quill_ast::sql::{Delete, SetClause, TableRef, Update};
use quill_ast::{ActionStmt, Assignable, CreateAction, Expr, Modifier, NamedType, SqlStatement, Statement, Subscript, Variable};
use quill_interpreter::{AuthError, ExecError, Row};
use quill_testing::OWNER;
use quill_values::{ArithOp, ArrayValue, CmpOp, DataType, Value, ValueError};

#[test]
fn insert_update_delete_select() {
    let mut h = harness();
    h.execute(OWNER, &[users_table()]).unwrap().assert_ok();

    h.execute(
        OWNER,
        &[
            sql(insert(
                "users",
                &["id", "name", "age"],
                vec![vec![Expr::int(1), Expr::text("Alice"), Expr::int(30)]],
            )),
            sql(Update {
                table: "users".into(),
                set: vec![SetClause {
                    column: "age".into(),
                    value: Expr::int(50),
                }],
                filter: Some(Expr::column("name").cmp(CmpOp::Eq, Expr::text("Alice"))),
            }),
            sql(Delete {
                table: "users".into(),
                filter: Some(Expr::column("age").cmp(CmpOp::Eq, Expr::int(40))),
            }),
        ],
    )
    .unwrap()
    .assert_ok();

    let out = h.execute(OWNER, &[sql(select(&["name", "age"], "users"))]).unwrap();
    assert_eq!(
        out.rows,
        vec![Row {
            columns: vec!["name".into(), "age".into()],
            values: vec![Value::text("Alice"), Value::int(50)],
        }]
    );
}

#[test]
fn action_returns_count_of_inserted_rows() {
    let mut h = harness();
    let members = Statement::new(quill_ast::ddl::CreateTable {
        if_not_exists: false,
        name: "members".into(),
        columns: vec![
            ColumnDef::new("name", DataType::TEXT).not_null(),
            ColumnDef::new("age", DataType::INT),
        ],
        constraints: vec![],
    });
    let mut count = count_star();
    count.from = Some(TableRef::new("members"));
    count.filter = Some(Expr::column("name").cmp(CmpOp::Eq, Expr::var("$name")));
    let create_user = CreateAction::new(
        "create_user",
        vec![Modifier::Public],
        vec![
            ActionStmt::Sql(SqlStatement::Insert(insert(
                "members",
                &["name", "age"],
                vec![vec![Expr::var("$name"), Expr::var("$age")]],
            ))),
            ActionStmt::Return(ReturnValue::Sql(SqlStatement::Select(count))),
        ],
    )
    .params(vec![
        NamedType::new("$name", DataType::TEXT),
        NamedType::new("$age", DataType::INT),
    ])
    .returns(false, vec![NamedType::new("count", DataType::INT)]);

    h.execute(OWNER, &[members, Statement::new(create_user)]).unwrap().assert_ok();

    let out = h
        .call("0xalice", "", "create_user", vec![Value::text("Alice"), Value::int(30)])
        .unwrap();
    out.assert_ok();
    assert_eq!(out.column("count"), vec![Value::int(1)]);
}

#[test]
fn range_loop_sums_inclusive_bounds() {
    let mut h = harness();
    let out = h
        .execute(
            OWNER,
            &[
                stmt(ActionStmt::assign("$sum", Expr::int(0))),
                stmt(ActionStmt::for_range(
                    "$i",
                    Expr::int(1),
                    Expr::int(4),
                    vec![ActionStmt::assign(
                        "$sum",
                        Expr::var("$sum").arith(ArithOp::Add, Expr::var("$i")),
                    )],
                )),
                sql(quill_ast::sql::Select::new(vec![Expr::var("$sum")])),
            ],
        )
        .unwrap();
    out.assert_ok();
    assert_eq!(out.rows.len(), 1);
    assert_eq!(out.rows[0].values, vec![Value::int(10)]);
}

fn ints(values: &[i64]) -> Value {
    Value::Array(ArrayValue::from_values(values.iter().map(|&v| Value::int(v)).collect()).unwrap())
}

#[test]
fn array_slices_and_element_assignment() {
    let mut h = harness();
    let literal = |values: &[i64]| Expr::array(values.iter().map(|&v| Expr::int(v)).collect());
    let out = h
        .execute(
            OWNER,
            &[
                stmt(ActionStmt::assign(
                    "$slice",
                    literal(&[1, 2, 3, 4, 5]).slice(Some(Expr::int(2)), Some(Expr::int(3))),
                )),
                stmt(ActionStmt::assign("$arr", literal(&[1, 2, 3]))),
                stmt(ActionStmt::Assign {
                    target: Assignable::ArrayElement {
                        array: Variable::new("$arr"),
                        subscript: Subscript::Index(Box::new(Expr::int(2))),
                    },
                    ty: None,
                    value: Expr::int(5),
                }),
                sql(quill_ast::sql::Select::new(vec![
                    Expr::var("$slice"),
                    Expr::var("$arr"),
                    Expr::var("$arr").index(Expr::int(3)),
                ])),
            ],
        )
        .unwrap();
    out.assert_ok();
    assert_eq!(out.rows[0].values, vec![ints(&[2, 3]), ints(&[1, 5, 3]), Value::int(3)]);
}

#[test]
fn huge_array_writes_fail_instead_of_growing() {
    let mut h = harness();
    let err = h
        .execute(
            OWNER,
            &[
                stmt(ActionStmt::assign("$arr", Expr::array(vec![Expr::int(1)]))),
                stmt(ActionStmt::Assign {
                    target: Assignable::ArrayElement {
                        array: Variable::new("$arr"),
                        subscript: Subscript::Index(Box::new(Expr::int(i64::MAX))),
                    },
                    ty: None,
                    value: Expr::int(2),
                }),
            ],
        )
        .unwrap_err();
    assert!(
        matches!(err, ExecError::Value(ValueError::ArrayTooLarge { index: i64::MAX, .. })),
        "unexpected error: {err}"
    );
}

#[test]
fn revoking_select_from_default_role() {
    let mut h = harness();
    h.execute(OWNER, &[users_table()]).unwrap().assert_ok();
    let query = [sql(select(&["name"], "users"))];

    h.execute("0xalice", &query).unwrap().assert_ok();

    h.execute(OWNER, &[revoke(&["SELECT"], "default", None)]).unwrap().assert_ok();
    let err = h.execute("0xalice", &query).unwrap_err();
    assert!(
        matches!(err, ExecError::Auth(AuthError::MissingPrivilege { .. })),
        "unexpected error: {err}"
    );

    h.execute(OWNER, &[grant(&["SELECT"], "default", None)]).unwrap().assert_ok();
    h.execute("0xalice", &query).unwrap().assert_ok();
}

#[test]
fn return_shape_mismatch_is_rejected_before_running() {
    let mut h = harness();
    h.execute(OWNER, &[users_table()]).unwrap().assert_ok();
    let act = CreateAction::new(
        "act",
        vec![Modifier::Public],
        vec![
            ActionStmt::Sql(SqlStatement::Insert(insert(
                "users",
                &["id", "name"],
                vec![vec![Expr::int(1), Expr::text("Bob")]],
            ))),
            ActionStmt::return_values(vec![Expr::int(1), Expr::int(2)]),
        ],
    )
    .returns(false, vec![NamedType::new("count", DataType::INT)]);

    let err = h.execute(OWNER, &[Statement::new(act)]).unwrap_err();
    assert!(matches!(err, ExecError::Planning(_)), "unexpected error: {err}");
    assert!(err.to_string().starts_with("caught at plan time: return shape mismatch in `act`"));
    assert_eq!(h.store().image().row_count("main", "users"), Some(0));

    let err = h.call(OWNER, "", "act", vec![]).unwrap_err();
    assert!(matches!(err, ExecError::Catalog(_)), "unexpected error: {err}");
}
