mod common;

use std::sync::Arc;

use common::*;
use pretty_assertions::assert_eq;
use quill_ast::ddl::{
    ActionReturn, ColumnDef, CreateNamespace, CreateRole, CreateTable, DropNamespace, GrantOrRevoke, GrantSubject,
    UnuseExtension, UseExtension, UserRef,
};
use quill_ast::sql::{Insert, TableRef};
use quill_ast::{ActionStmt, CreateAction, Expr, Modifier, NamedType, SqlStatement, Statement, TopLevel};
use quill_interpreter::{
    AuthError, CatalogError, ExecCtx, ExecError, ExecResult, ExtensionInstance, ExtensionMethod, ExtensionRegistry,
};
use quill_testing::{Harness, OWNER, init_logging};
use quill_values::{CmpOp, DataType, Value};

#[test]
fn failed_batches_leave_no_schema_behind() {
    let mut h = harness();
    let batch = [
        users_table(),
        sql(insert(
            "users",
            &["id", "name"],
            vec![
                vec![Expr::int(1), Expr::text("Ann")],
                vec![Expr::int(1), Expr::text("Ben")],
            ],
        )),
    ];
    let out = h.execute(OWNER, &batch).unwrap();
    assert!(out.error().is_some_and(|e| e.contains("users_pkey")), "{:?}", out.error());
    assert_eq!(h.store().image().row_count("main", "users"), None);

    // The interpreter forgot the table too, so it can be created again.
    h.execute(OWNER, &[users_table()]).unwrap().assert_ok();
}

#[test]
fn restart_restores_everything() {
    let mut h = harness();
    h.execute(
        OWNER,
        &[
            Statement::new(CreateNamespace {
                if_not_exists: false,
                namespace: "app".into(),
            }),
            Statement::in_namespace("app", users_table().kind),
            Statement::in_namespace(
                "app",
                SqlStatement::Insert(insert(
                    "users",
                    &["id", "name", "age"],
                    vec![vec![Expr::int(7), Expr::text("Dora"), Expr::int(41)]],
                )),
            ),
            Statement::in_namespace(
                "app",
                CreateAction::new(
                    "age_of",
                    vec![Modifier::Public, Modifier::View],
                    vec![ActionStmt::Return(quill_ast::ReturnValue::Sql(SqlStatement::Select(
                        select(&["age"], "users").filter(Expr::column("name").cmp(CmpOp::Eq, Expr::var("$name"))),
                    )))],
                )
                .params(vec![NamedType::new("$name", DataType::TEXT)])
                .returns(false, vec![NamedType::new("age", DataType::INT)]),
            ),
        ],
    )
    .unwrap()
    .assert_ok();

    let before = h.view("0xalice", "app", "age_of", vec![Value::text("Dora")]).unwrap();
    h.restart().unwrap();
    let after = h.view("0xalice", "app", "age_of", vec![Value::text("Dora")]).unwrap();
    assert_eq!(before.rows, after.rows);
    assert_eq!(after.column("age"), vec![Value::int(41)]);
}

#[test]
fn privileges_survive_a_restart() {
    let mut h = harness();
    h.execute(
        OWNER,
        &[
            users_table(),
            Statement::new(CreateAction::new("ping", vec![Modifier::Public], vec![])),
        ],
    )
    .unwrap()
    .assert_ok();

    let row = |id: i64| sql(insert("users", &["id", "name"], vec![vec![Expr::int(id), Expr::text("x")]]));
    let probe = |h: &mut Harness, id: i64| -> (bool, bool, bool) {
        (
            h.execute("0xalice", &[row(id)]).is_ok(),
            h.call("0xalice", "", "ping", vec![]).is_ok(),
            h.execute("0xalice", &[sql(select(&["id"], "users"))]).is_ok(),
        )
    };

    assert_eq!(probe(&mut h, 1), (false, true, true));
    h.execute(
        OWNER,
        &[
            grant(&["INSERT"], "default", Some("main")),
            revoke(&["CALL"], "default", None),
            revoke(&["SELECT"], "default", Some("main")),
        ],
    )
    .unwrap()
    .assert_ok();

    let before = probe(&mut h, 2);
    assert_eq!(before, (true, false, false));
    h.restart().unwrap();
    assert_eq!(probe(&mut h, 3), before);
}

#[test]
fn global_revoke_clears_namespaced_grants_across_a_restart() {
    let mut h = harness();
    h.execute(
        OWNER,
        &[
            users_table(),
            Statement::new(CreateRole {
                if_not_exists: false,
                role: "writer".into(),
            }),
            Statement::new(GrantOrRevoke {
                is_grant: true,
                if_: false,
                subject: GrantSubject::Role {
                    role: "writer".into(),
                    user: UserRef::Literal("0xbob".into()),
                },
                namespace: None,
            }),
            grant(&["INSERT"], "writer", Some("main")),
            grant(&["INSERT"], "writer", None),
            revoke(&["INSERT"], "writer", None),
        ],
    )
    .unwrap()
    .assert_ok();

    let row = |id: i64| [sql(insert("users", &["id", "name"], vec![vec![Expr::int(id), Expr::text("x")]]))];
    let err = h.execute("0xbob", &row(1)).unwrap_err();
    assert!(matches!(err, ExecError::Auth(AuthError::MissingPrivilege { .. })), "{err}");

    h.restart().unwrap();
    let err = h.execute("0xbob", &row(2)).unwrap_err();
    assert!(matches!(err, ExecError::Auth(AuthError::MissingPrivilege { .. })), "{err}");
}

#[test]
fn roles_grant_privileges_to_their_users() {
    let mut h = harness();
    h.execute(
        OWNER,
        &[
            users_table(),
            Statement::new(CreateRole {
                if_not_exists: false,
                role: "writer".into(),
            }),
            grant(&["INSERT"], "writer", None),
            Statement::new(GrantOrRevoke {
                is_grant: true,
                if_: false,
                subject: GrantSubject::Role {
                    role: "writer".into(),
                    user: UserRef::Literal("0xbob".into()),
                },
                namespace: None,
            }),
        ],
    )
    .unwrap()
    .assert_ok();

    let row = |id: i64| [sql(insert("users", &["id", "name"], vec![vec![Expr::int(id), Expr::text("x")]]))];
    h.execute("0xbob", &row(1)).unwrap().assert_ok();
    assert!(h.execute("0xalice", &row(2)).is_err());

    h.restart().unwrap();
    h.execute("0xbob", &row(3)).unwrap().assert_ok();

    let err = h.execute("0xbob", &[grant(&["INSERT"], "default", None)]).unwrap_err();
    assert!(matches!(err, ExecError::Auth(AuthError::MissingPrivilege { .. })), "{err}");
}

#[test]
fn roles_and_use_cannot_be_namespaced() {
    let mut h = harness();
    for privilege in ["ROLES", "USE"] {
        assert!(h.execute(OWNER, &[grant(&[privilege], "default", Some("main"))]).is_err());
    }
}

#[test]
fn built_in_namespaces_cannot_be_dropped() {
    let mut h = harness();
    for namespace in ["main", "info"] {
        let err = h
            .execute(
                OWNER,
                &[Statement::new(DropNamespace {
                    if_exists: false,
                    namespace: namespace.into(),
                })],
            )
            .unwrap_err();
        assert!(matches!(err, ExecError::Catalog(CatalogError::BuiltInNamespace(_))), "{err}");
    }
}

/// A key/value extension that keeps its data in a table of its own namespace.
struct Kv;

fn kv(_alias: &str, _config: &[(String, Value)]) -> anyhow::Result<Arc<dyn ExtensionInstance>> {
    Ok(Arc::new(Kv))
}

impl ExtensionInstance for Kv {
    fn methods(&self) -> Vec<ExtensionMethod> {
        vec![
            ExtensionMethod::new("put", vec![Modifier::Public], |ctx, args, sink| {
                let insert = SqlStatement::Insert(Insert {
                    table: "entries".into(),
                    columns: vec!["key".into(), "value".into()],
                    values: vec![vec![Expr::var("$key"), Expr::var("$value")]],
                });
                let params = vec![("$key".into(), args[0].clone()), ("$value".into(), args[1].clone())];
                ctx.run_query(&insert, params, sink)
            })
            .params(vec![DataType::TEXT, DataType::TEXT]),
            ExtensionMethod::new("get", vec![Modifier::Public, Modifier::View], |ctx, args, sink| {
                let select = select(&["value"], "entries").filter(Expr::column("key").cmp(CmpOp::Eq, Expr::var("$key")));
                ctx.run_query(&SqlStatement::Select(select), vec![("$key".into(), args[0].clone())], sink)
            })
            .params(vec![DataType::TEXT])
            .returns(ActionReturn {
                is_table: false,
                fields: vec![NamedType::new("value", DataType::TEXT)],
            }),
        ]
    }

    fn on_use(&self, ctx: &mut ExecCtx<'_>) -> ExecResult<()> {
        let entries = CreateTable {
            if_not_exists: false,
            name: "entries".into(),
            columns: vec![
                ColumnDef::new("key", DataType::TEXT).primary_key(),
                ColumnDef::new("value", DataType::TEXT),
            ],
            constraints: vec![],
        };
        ctx.execute(&Statement::new(entries), &mut |_| Ok(()))
    }
}

#[test]
fn extensions_live_in_their_own_namespace() {
    init_logging();
    let mut h = Harness::with_extensions(ExtensionRegistry::new().register("kv", kv)).unwrap();
    h.execute(
        OWNER,
        &[Statement::new(UseExtension {
            if_not_exists: false,
            extension: "kv".into(),
            config: vec![],
            alias: "store".into(),
        })],
    )
    .unwrap()
    .assert_ok();

    h.call("0xalice", "store", "put", vec![Value::text("a"), Value::text("1")])
        .unwrap()
        .assert_ok();
    h.restart().unwrap();
    let out = h.view("0xalice", "store", "get", vec![Value::text("a")]).unwrap();
    assert_eq!(out.column("value"), vec![Value::text("1")]);

    let err = h
        .execute(
            OWNER,
            &[Statement::in_namespace(
                "store",
                TopLevel::Sql(SqlStatement::Select(
                    quill_ast::sql::Select::new(vec![Expr::column("key")]).from_table(TableRef::new("entries")),
                )),
            )],
        )
        .map(|out| out.rows.len());
    assert_eq!(err.ok(), Some(1), "extension tables are readable");

    let err = h
        .execute(OWNER, &[Statement::in_namespace("store", users_table().kind)])
        .unwrap_err();
    assert!(matches!(err, ExecError::Catalog(CatalogError::ExtensionSchema(_))), "{err}");

    h.execute(
        OWNER,
        &[Statement::new(UnuseExtension {
            if_exists: false,
            alias: "store".into(),
        })],
    )
    .unwrap()
    .assert_ok();
    let err = h.view("0xalice", "store", "get", vec![Value::text("a")]).unwrap_err();
    assert!(matches!(err, ExecError::Catalog(CatalogError::UnknownNamespace(_))), "{err}");
}

/// An extension whose read-only method tries to create a namespace.
struct Sneaky;

fn sneaky(_alias: &str, _config: &[(String, Value)]) -> anyhow::Result<Arc<dyn ExtensionInstance>> {
    Ok(Arc::new(Sneaky))
}

impl ExtensionInstance for Sneaky {
    fn methods(&self) -> Vec<ExtensionMethod> {
        vec![ExtensionMethod::new(
            "peek",
            vec![Modifier::Public, Modifier::View],
            |ctx, _args, sink| {
                let create = Statement::new(CreateNamespace {
                    if_not_exists: false,
                    namespace: "shadow".into(),
                });
                ctx.execute(&create, sink)
            },
        )]
    }
}

#[test]
fn read_only_calls_leave_the_catalog_alone() {
    let mut h = Harness::with_extensions(ExtensionRegistry::new().register("sneaky", sneaky)).unwrap();
    h.execute(
        OWNER,
        &[Statement::new(UseExtension {
            if_not_exists: false,
            extension: "sneaky".into(),
            config: vec![],
            alias: "sneaky".into(),
        })],
    )
    .unwrap()
    .assert_ok();

    let err = h.view(OWNER, "sneaky", "peek", vec![]).unwrap_err();
    assert!(matches!(err, ExecError::Auth(AuthError::ReadOnlyContext)), "{err}");

    // The namespace is still free to create in a read-write call.
    h.execute(
        OWNER,
        &[Statement::new(CreateNamespace {
            if_not_exists: false,
            namespace: "shadow".into(),
        })],
    )
    .unwrap()
    .assert_ok();
}
