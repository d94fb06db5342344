use quill_ast::Statement;
use quill_interpreter::{
    AccessMode, CallResult, ExecResult, ExtensionRegistry, Interpreter, InterpreterConfig, Row, TxContext,
};
use quill_values::Value;

use crate::store::{MemoryStore, MemoryTx};

/// The owner of every store a [`Harness`] creates.
pub const OWNER: &str = "0xowner";

/// What one call or batch produced.
#[derive(Debug)]
pub struct Outcome {
    pub rows: Vec<Row>,
    pub result: CallResult,
}

impl Outcome {
    pub fn logs(&self) -> &[String] {
        &self.result.logs
    }

    pub fn error(&self) -> Option<String> {
        self.result.error.as_ref().map(ToString::to_string)
    }

    /// The values of `column` across all rows.
    pub fn column(&self, column: &str) -> Vec<Value> {
        self.rows.iter().filter_map(|r| r.get(column).cloned()).collect()
    }

    #[track_caller]
    pub fn assert_ok(&self) -> &Self {
        if let Some(error) = &self.result.error {
            panic!("expected success, got: {error}");
        }
        self
    }
}

/// Drives an [`Interpreter`] over a [`MemoryStore`] the way a node does: every call
/// runs in its own transaction, committed only if the call succeeded.
pub struct Harness {
    store: MemoryStore,
    interpreter: Interpreter,
    config: InterpreterConfig,
    extensions: ExtensionRegistry,
}

impl Harness {
    pub fn new() -> ExecResult<Self> {
        Self::with_extensions(ExtensionRegistry::new())
    }

    pub fn with_extensions(extensions: ExtensionRegistry) -> ExecResult<Self> {
        Self::build(InterpreterConfig::default().with_initial_owner(OWNER), extensions)
    }

    pub fn build(config: InterpreterConfig, extensions: ExtensionRegistry) -> ExecResult<Self> {
        let mut store = MemoryStore::new();
        let interpreter = load(&mut store, &config, &extensions)?;
        Ok(Self {
            store,
            interpreter,
            config,
            extensions,
        })
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// Throws the interpreter away and loads a new one from the store.
    pub fn restart(&mut self) -> ExecResult<()> {
        log::debug!("restarting the interpreter");
        self.interpreter = load(&mut self.store, &self.config, &self.extensions)?;
        Ok(())
    }

    pub fn execute(&mut self, caller: &str, statements: &[Statement]) -> ExecResult<Outcome> {
        self.execute_with(&TxContext::new(caller), statements, &[])
    }

    pub fn execute_with(
        &mut self,
        tx: &TxContext,
        statements: &[Statement],
        params: &[(String, Value)],
    ) -> ExecResult<Outcome> {
        let mut rows = vec![];
        let mut db = self.store.begin(AccessMode::ReadWrite);
        let res = self.interpreter.execute(tx, &mut db, statements, params, &mut |row| {
            rows.push(row);
            Ok(())
        });
        settle(db, res, rows)
    }

    pub fn call(&mut self, caller: &str, namespace: &str, action: &str, args: Vec<Value>) -> ExecResult<Outcome> {
        self.call_in(AccessMode::ReadWrite, &TxContext::new(caller), namespace, action, args)
    }

    /// Calls `action` in a read-only transaction.
    pub fn view(&mut self, caller: &str, namespace: &str, action: &str, args: Vec<Value>) -> ExecResult<Outcome> {
        self.call_in(AccessMode::ReadOnly, &TxContext::new(caller), namespace, action, args)
    }

    pub fn call_in(
        &mut self,
        mode: AccessMode,
        tx: &TxContext,
        namespace: &str,
        action: &str,
        args: Vec<Value>,
    ) -> ExecResult<Outcome> {
        let mut rows = vec![];
        let mut db = self.store.begin(mode);
        let res = self.interpreter.call(tx, &mut db, namespace, action, args, &mut |row| {
            rows.push(row);
            Ok(())
        });
        settle(db, res, rows)
    }
}

fn load(store: &mut MemoryStore, config: &InterpreterConfig, extensions: &ExtensionRegistry) -> ExecResult<Interpreter> {
    let mut db = store.begin(AccessMode::ReadWrite);
    let interpreter = Interpreter::new(config.clone(), &mut db, extensions.clone())?;
    db.commit();
    Ok(interpreter)
}

fn settle(db: MemoryTx<'_>, res: ExecResult<CallResult>, rows: Vec<Row>) -> ExecResult<Outcome> {
    let result = res?;
    match &result.error {
        None => db.commit(),
        Some(error) => log::debug!("rolling back: {error}"),
    }
    Ok(Outcome { rows, result })
}
