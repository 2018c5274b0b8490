use crate::error::{ScriptError, Span};
use crate::report::{ConsoleRecorder, EntryKind, OutputEntry};
use crate::sandbox::{CancelHandle, RunLimits};
use crate::script::ast::{
    AssignOp, AssignTarget, BinaryOp, Expr, LogicalOp, Program, Stmt, TemplatePart, UnaryOp,
};
use crate::script::value::{FunctionData, JsonView, ObjectData, Value};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Wall-clock and cancellation flags are polled once per this many steps;
/// fuel is charged on every step.
const CHECK_INTERVAL: u64 = 1024;

/// Longest string any operation may produce. Concatenation, templates,
/// `join`, and `repeat` all refuse to grow past this.
const MAX_STRING_LENGTH: usize = 10_000_000;

/// Largest index an element write may address. Bounds the hole padding a
/// single out-of-range write can allocate.
const MAX_ARRAY_LENGTH: usize = 10_000_000;

struct Binding {
    value: Value,
    constant: bool,
}

/// Lexically chained variable scope. Closures keep their defining chain
/// alive through the `Rc` links.
pub struct Environment {
    values: HashMap<String, Binding>,
    enclosing: Option<Rc<RefCell<Environment>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignResult {
    Assigned,
    ReadOnly,
    Missing,
}

impl Environment {
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
            enclosing: None,
        }
    }

    pub fn with_enclosing(enclosing: Rc<RefCell<Environment>>) -> Self {
        Self {
            values: HashMap::new(),
            enclosing: Some(enclosing),
        }
    }

    /// Unconditional definition, used for parameters, function declarations,
    /// and globals.
    pub fn define(&mut self, name: &str, value: Value, constant: bool) {
        self.values
            .insert(name.to_string(), Binding { value, constant });
    }

    /// `let`/`const` definition; rejects a second declaration of the same
    /// name in the same scope.
    pub fn declare(&mut self, name: &str, value: Value, constant: bool) -> bool {
        if self.values.contains_key(name) {
            return false;
        }
        self.define(name, value, constant);
        true
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.values.get(name) {
            return Some(binding.value.clone());
        }
        self.enclosing
            .as_ref()
            .and_then(|parent| parent.borrow().get(name))
    }

    pub fn assign(&mut self, name: &str, value: Value) -> AssignResult {
        if let Some(binding) = self.values.get_mut(name) {
            if binding.constant {
                return AssignResult::ReadOnly;
            }
            binding.value = value;
            return AssignResult::Assigned;
        }
        match &self.enclosing {
            Some(parent) => parent.borrow_mut().assign(name, value),
            None => AssignResult::Missing,
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-linear control flow propagated out of statement execution.
enum Flow {
    Normal,
    Break(Span),
    Continue(Span),
    Return(Value, Span),
}

/// Resolved assignment destination; container expressions are evaluated
/// exactly once even for compound assignment and updates.
enum ResolvedTarget {
    Variable(String),
    Member(Value, String),
    Index(Value, Value),
}

pub struct Evaluator {
    globals: Rc<RefCell<Environment>>,
    env: Rc<RefCell<Environment>>,
    console: ConsoleRecorder,
    timers: Vec<(String, Instant)>,
    fuel: u64,
    time_limit: Duration,
    deadline: Instant,
    cancel: CancelHandle,
    steps: u64,
    depth: usize,
    max_depth: usize,
    last_value: Option<Value>,
}

impl Evaluator {
    pub fn new(limits: &RunLimits, cancel: CancelHandle) -> Self {
        let globals = Rc::new(RefCell::new(Environment::new()));
        let mut evaluator = Self {
            globals: globals.clone(),
            env: globals,
            console: ConsoleRecorder::new(),
            timers: Vec::new(),
            fuel: limits.fuel,
            time_limit: limits.time_limit,
            deadline: Instant::now() + limits.time_limit,
            cancel,
            steps: 0,
            depth: 0,
            max_depth: limits.max_call_depth,
            last_value: None,
        };
        evaluator.install_globals();
        evaluator
    }

    /// Re-arm fuel, deadline, and cancellation without touching globals.
    /// The interactive loop calls this before every line.
    pub fn reset_budget(&mut self, limits: &RunLimits, cancel: CancelHandle) {
        self.fuel = limits.fuel;
        self.time_limit = limits.time_limit;
        self.deadline = Instant::now() + limits.time_limit;
        self.max_depth = limits.max_call_depth;
        self.cancel = cancel;
        self.steps = 0;
        self.depth = 0;
    }

    pub fn drain_output(&mut self) -> Vec<OutputEntry> {
        self.console.take()
    }

    /// Runs a program to completion. The returned value is that of the final
    /// top-level expression statement, if the program ends with one.
    pub fn evaluate_program(&mut self, program: &Program) -> Result<Option<Value>, ScriptError> {
        self.last_value = None;
        self.hoist_functions(&program.statements);

        for statement in &program.statements {
            match statement {
                Stmt::Expression { expr, .. } => {
                    let value = self.evaluate_expression(expr)?;
                    self.last_value = Some(value);
                }
                other => {
                    let flow = self.execute_statement(other)?;
                    if let Some(err) = illegal_flow_error(flow) {
                        return Err(err);
                    }
                    self.last_value = None;
                }
            }
        }

        Ok(self.last_value.clone())
    }

    fn hoist_functions(&mut self, statements: &[Stmt]) {
        for statement in statements {
            if let Stmt::Function {
                name, params, body, ..
            } = statement
            {
                let function = Value::Function(Rc::new(FunctionData {
                    name: Some(name.clone()),
                    params: params.clone(),
                    body: body.clone(),
                    closure: self.env.clone(),
                }));
                self.env.borrow_mut().define(name, function, false);
            }
        }
    }

    fn execute_statement(&mut self, statement: &Stmt) -> Result<Flow, ScriptError> {
        self.tick(statement.span())?;

        match statement {
            Stmt::Expression { expr, .. } => {
                self.evaluate_expression(expr)?;
                Ok(Flow::Normal)
            }
            Stmt::Declaration {
                name,
                initializer,
                constant,
                span,
            } => {
                let value = match initializer {
                    Some(expr) => self.evaluate_expression(expr)?,
                    None => Value::Undefined,
                };
                if !self.env.borrow_mut().declare(name, value, *constant) {
                    return Err(ScriptError::syntax(
                        *span,
                        format!("Identifier '{}' has already been declared", name),
                    ));
                }
                Ok(Flow::Normal)
            }
            Stmt::Block { statements, .. } => self.execute_block(statements),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                if self.evaluate_expression(condition)?.is_truthy() {
                    self.execute_statement(then_branch)
                } else if let Some(branch) = else_branch {
                    self.execute_statement(branch)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While {
                condition, body, ..
            } => {
                loop {
                    self.tick(condition.span())?;
                    if !self.evaluate_expression(condition)?.is_truthy() {
                        break;
                    }
                    match self.execute_statement(body)? {
                        Flow::Normal | Flow::Continue(_) => {}
                        Flow::Break(_) => break,
                        ret @ Flow::Return(..) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                initializer,
                condition,
                increment,
                body,
                span,
            } => {
                // The loop variable lives in its own scope
                let previous = self.env.clone();
                self.env = Rc::new(RefCell::new(Environment::with_enclosing(previous.clone())));
                let result = self.run_for_loop(initializer, condition, increment, body, *span);
                self.env = previous;
                result
            }
            Stmt::Function { .. } => {
                // Defined when the surrounding statement list was entered
                Ok(Flow::Normal)
            }
            Stmt::Return { value, span } => {
                let value = match value {
                    Some(expr) => self.evaluate_expression(expr)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value, *span))
            }
            Stmt::Break { span } => Ok(Flow::Break(*span)),
            Stmt::Continue { span } => Ok(Flow::Continue(*span)),
            Stmt::Throw { value, span } => {
                let value = self.evaluate_expression(value)?;
                Err(thrown_error(value, *span))
            }
        }
    }

    fn execute_block(&mut self, statements: &[Stmt]) -> Result<Flow, ScriptError> {
        let previous = self.env.clone();
        self.env = Rc::new(RefCell::new(Environment::with_enclosing(previous.clone())));
        self.hoist_functions(statements);

        let mut flow = Flow::Normal;
        for statement in statements {
            match self.execute_statement(statement) {
                Ok(Flow::Normal) => {}
                Ok(other) => {
                    flow = other;
                    break;
                }
                Err(err) => {
                    self.env = previous;
                    return Err(err);
                }
            }
        }

        self.env = previous;
        Ok(flow)
    }

    fn run_for_loop(
        &mut self,
        initializer: &Option<Box<Stmt>>,
        condition: &Option<Expr>,
        increment: &Option<Expr>,
        body: &Stmt,
        span: Span,
    ) -> Result<Flow, ScriptError> {
        if let Some(init) = initializer {
            self.execute_statement(init)?;
        }

        loop {
            let tick_span = condition.as_ref().map(|c| c.span()).unwrap_or(span);
            self.tick(tick_span)?;

            if let Some(cond) = condition {
                if !self.evaluate_expression(cond)?.is_truthy() {
                    break;
                }
            }

            match self.execute_statement(body)? {
                Flow::Normal | Flow::Continue(_) => {}
                Flow::Break(_) => break,
                ret @ Flow::Return(..) => return Ok(ret),
            }

            if let Some(inc) = increment {
                self.evaluate_expression(inc)?;
            }
        }

        Ok(Flow::Normal)
    }

    fn evaluate_expression(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        self.tick(expr.span())?;

        match expr {
            Expr::Literal { value, .. } => Ok(value.clone()),
            Expr::Variable { name, span } => self
                .env
                .borrow()
                .get(name)
                .ok_or_else(|| ScriptError::reference(*span, format!("{} is not defined", name))),
            Expr::Grouping { expr, .. } => self.evaluate_expression(expr),
            Expr::Array { elements, .. } => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.evaluate_expression(element)?);
                }
                Ok(Value::array(items))
            }
            Expr::Object { pairs, .. } => {
                let mut data = ObjectData::new();
                for (key, value_expr) in pairs {
                    let value = self.evaluate_expression(value_expr)?;
                    data.set(key, value);
                }
                Ok(Value::object(data))
            }
            Expr::Template { parts, span } => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(chunk) => text.push_str(chunk),
                        TemplatePart::Expr(inner) => {
                            let value = self.evaluate_expression(inner)?;
                            text.push_str(&value.to_js_string());
                        }
                    }
                    check_string_length(text.len(), *span)?;
                }
                Ok(Value::Str(text))
            }
            Expr::Unary {
                operator, operand, ..
            } => self.evaluate_unary(*operator, operand),
            Expr::Binary {
                left,
                operator,
                right,
                span,
            } => {
                let left = self.evaluate_expression(left)?;
                let right = self.evaluate_expression(right)?;
                self.apply_binary(*operator, left, right, *span)
            }
            Expr::Logical {
                left,
                operator,
                right,
                ..
            } => {
                let left = self.evaluate_expression(left)?;
                match operator {
                    LogicalOp::And => {
                        if left.is_truthy() {
                            self.evaluate_expression(right)
                        } else {
                            Ok(left)
                        }
                    }
                    LogicalOp::Or => {
                        if left.is_truthy() {
                            Ok(left)
                        } else {
                            self.evaluate_expression(right)
                        }
                    }
                }
            }
            Expr::Ternary {
                condition,
                then_value,
                else_value,
                ..
            } => {
                if self.evaluate_expression(condition)?.is_truthy() {
                    self.evaluate_expression(then_value)
                } else {
                    self.evaluate_expression(else_value)
                }
            }
            Expr::Assign {
                target,
                op,
                value,
                span,
            } => self.evaluate_assign(target, *op, value, *span),
            Expr::Update {
                target,
                increment,
                prefix,
                span,
            } => {
                let resolved = self.resolve_target(target)?;
                let current = self.read_target(&resolved, target.span())?.to_number();
                let next = if *increment {
                    current + 1.0
                } else {
                    current - 1.0
                };
                self.write_target(&resolved, Value::Number(next), *span)?;
                Ok(Value::Number(if *prefix { next } else { current }))
            }
            Expr::Member {
                object,
                property,
                span,
            } => {
                let receiver = self.evaluate_expression(object)?;
                self.member_get(&receiver, property, *span)
            }
            Expr::Index {
                object,
                index,
                span,
            } => {
                let receiver = self.evaluate_expression(object)?;
                let key = self.evaluate_expression(index)?;
                self.index_get(&receiver, &key, *span)
            }
            Expr::Call { callee, args, span } => self.evaluate_call(callee, args, *span),
            Expr::New { callee, args, span } => {
                let function = self.evaluate_expression(callee)?;
                let arg_values = self.evaluate_args(args)?;
                match function {
                    Value::Function(_) | Value::Native(_) => {
                        self.call_value(function, &arg_values, *span)
                    }
                    other => Err(ScriptError::type_error(
                        *span,
                        format!("{} is not a constructor", other.type_name()),
                    )),
                }
            }
            Expr::Function {
                name, params, body, ..
            } => Ok(Value::Function(Rc::new(FunctionData {
                name: name.clone(),
                params: params.clone(),
                body: body.clone(),
                closure: self.env.clone(),
            }))),
        }
    }

    fn evaluate_unary(&mut self, operator: UnaryOp, operand: &Expr) -> Result<Value, ScriptError> {
        match operator {
            UnaryOp::Negate => {
                let value = self.evaluate_expression(operand)?;
                Ok(Value::Number(-value.to_number()))
            }
            UnaryOp::Not => {
                let value = self.evaluate_expression(operand)?;
                Ok(Value::Bool(!value.is_truthy()))
            }
            UnaryOp::TypeOf => {
                // typeof never throws on unresolved names
                if let Expr::Variable { name, .. } = operand {
                    let looked_up = self.env.borrow().get(name);
                    return Ok(Value::Str(
                        looked_up
                            .map(|v| v.type_of())
                            .unwrap_or("undefined")
                            .to_string(),
                    ));
                }
                let value = self.evaluate_expression(operand)?;
                Ok(Value::Str(value.type_of().to_string()))
            }
        }
    }

    fn evaluate_assign(
        &mut self,
        target: &AssignTarget,
        op: AssignOp,
        value: &Expr,
        span: Span,
    ) -> Result<Value, ScriptError> {
        let resolved = self.resolve_target(target)?;

        let new_value = match op {
            AssignOp::Set => self.evaluate_expression(value)?,
            compound => {
                let current = self.read_target(&resolved, target.span())?;
                let rhs = self.evaluate_expression(value)?;
                let operator = match compound {
                    AssignOp::Add => BinaryOp::Add,
                    AssignOp::Subtract => BinaryOp::Subtract,
                    AssignOp::Multiply => BinaryOp::Multiply,
                    _ => BinaryOp::Divide,
                };
                self.apply_binary(operator, current, rhs, span)?
            }
        };

        self.write_target(&resolved, new_value.clone(), span)?;
        Ok(new_value)
    }

    fn resolve_target(&mut self, target: &AssignTarget) -> Result<ResolvedTarget, ScriptError> {
        match target {
            AssignTarget::Variable { name, .. } => Ok(ResolvedTarget::Variable(name.clone())),
            AssignTarget::Member {
                object, property, ..
            } => {
                let receiver = self.evaluate_expression(object)?;
                Ok(ResolvedTarget::Member(receiver, property.clone()))
            }
            AssignTarget::Index { object, index, .. } => {
                let receiver = self.evaluate_expression(object)?;
                let key = self.evaluate_expression(index)?;
                Ok(ResolvedTarget::Index(receiver, key))
            }
        }
    }

    fn read_target(&mut self, target: &ResolvedTarget, span: Span) -> Result<Value, ScriptError> {
        match target {
            ResolvedTarget::Variable(name) => self
                .env
                .borrow()
                .get(name)
                .ok_or_else(|| ScriptError::reference(span, format!("{} is not defined", name))),
            ResolvedTarget::Member(receiver, property) => self.member_get(receiver, property, span),
            ResolvedTarget::Index(receiver, key) => self.index_get(receiver, key, span),
        }
    }

    fn write_target(
        &mut self,
        target: &ResolvedTarget,
        value: Value,
        span: Span,
    ) -> Result<(), ScriptError> {
        match target {
            ResolvedTarget::Variable(name) => {
                match self.env.borrow_mut().assign(name, value) {
                    AssignResult::Assigned => Ok(()),
                    AssignResult::ReadOnly => Err(ScriptError::type_error(
                        span,
                        "Assignment to constant variable".to_string(),
                    )),
                    AssignResult::Missing => Err(ScriptError::reference(
                        span,
                        format!("{} is not defined", name),
                    )),
                }
            }
            ResolvedTarget::Member(receiver, property) => {
                match receiver {
                    Value::Object(data) => {
                        data.borrow_mut().set(property, value);
                        Ok(())
                    }
                    Value::Null | Value::Undefined => Err(ScriptError::type_error(
                        span,
                        format!(
                            "Cannot set properties of {} (setting '{}')",
                            receiver.type_name(),
                            property
                        ),
                    )),
                    // Properties cannot be attached to other values; the
                    // write is silently dropped
                    _ => Ok(()),
                }
            }
            ResolvedTarget::Index(receiver, key) => match receiver {
                Value::Array(items) => {
                    let n = key.to_number();
                    if n.fract() == 0.0 && n >= 0.0 && n.is_finite() {
                        let index = n as usize;
                        if index >= MAX_ARRAY_LENGTH {
                            return Err(ScriptError::range(
                                span,
                                "Invalid array length".to_string(),
                            ));
                        }
                        let mut items = items.borrow_mut();
                        if index < items.len() {
                            items[index] = value;
                        } else {
                            // Writes past the end pad with holes; each
                            // padded hole is a charged step
                            while items.len() < index {
                                self.tick(span)?;
                                items.push(Value::Undefined);
                            }
                            items.push(value);
                        }
                    }
                    Ok(())
                }
                Value::Object(data) => {
                    data.borrow_mut().set(&key.to_js_string(), value);
                    Ok(())
                }
                Value::Null | Value::Undefined => Err(ScriptError::type_error(
                    span,
                    format!(
                        "Cannot set properties of {} (setting '{}')",
                        receiver.type_name(),
                        key.to_js_string()
                    ),
                )),
                _ => Ok(()),
            },
        }
    }

    fn member_get(
        &self,
        receiver: &Value,
        property: &str,
        span: Span,
    ) -> Result<Value, ScriptError> {
        match receiver {
            Value::Null | Value::Undefined => Err(ScriptError::type_error(
                span,
                format!(
                    "Cannot read properties of {} (reading '{}')",
                    receiver.type_name(),
                    property
                ),
            )),
            Value::Str(s) => match property {
                "length" => Ok(Value::Number(s.chars().count() as f64)),
                _ => Ok(Value::Undefined),
            },
            Value::Array(items) => match property {
                "length" => Ok(Value::Number(items.borrow().len() as f64)),
                _ => Ok(Value::Undefined),
            },
            Value::Object(data) => Ok(data.borrow().get(property).unwrap_or(Value::Undefined)),
            _ => Ok(Value::Undefined),
        }
    }

    fn index_get(&self, receiver: &Value, key: &Value, span: Span) -> Result<Value, ScriptError> {
        match receiver {
            Value::Null | Value::Undefined => Err(ScriptError::type_error(
                span,
                format!(
                    "Cannot read properties of {} (reading '{}')",
                    receiver.type_name(),
                    key.to_js_string()
                ),
            )),
            Value::Array(items) => {
                if key.to_js_string() == "length" {
                    return Ok(Value::Number(items.borrow().len() as f64));
                }
                let n = key.to_number();
                if n.fract() == 0.0 && n >= 0.0 && n.is_finite() {
                    Ok(items
                        .borrow()
                        .get(n as usize)
                        .cloned()
                        .unwrap_or(Value::Undefined))
                } else {
                    Ok(Value::Undefined)
                }
            }
            Value::Str(s) => {
                if key.to_js_string() == "length" {
                    return Ok(Value::Number(s.chars().count() as f64));
                }
                let n = key.to_number();
                if n.fract() == 0.0 && n >= 0.0 && n.is_finite() {
                    Ok(s.chars()
                        .nth(n as usize)
                        .map(|c| Value::Str(c.to_string()))
                        .unwrap_or(Value::Undefined))
                } else {
                    Ok(Value::Undefined)
                }
            }
            Value::Object(data) => Ok(data
                .borrow()
                .get(&key.to_js_string())
                .unwrap_or(Value::Undefined)),
            _ => Ok(Value::Undefined),
        }
    }

    fn evaluate_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        span: Span,
    ) -> Result<Value, ScriptError> {
        // Method-style calls dispatch string/array builtins and object
        // properties without a separate property read
        if let Expr::Member {
            object, property, ..
        } = callee
        {
            let receiver = self.evaluate_expression(object)?;
            match &receiver {
                Value::Str(_) | Value::Array(_) => {
                    let arg_values = self.evaluate_args(args)?;
                    return self.call_builtin_method(&receiver, property, &arg_values, span);
                }
                Value::Object(data) => {
                    let method = data.borrow().get(property);
                    return match method {
                        Some(f @ (Value::Function(_) | Value::Native(_))) => {
                            let arg_values = self.evaluate_args(args)?;
                            self.call_value(f, &arg_values, span)
                        }
                        _ => Err(ScriptError::type_error(
                            span,
                            format!("{} is not a function", property),
                        )),
                    };
                }
                Value::Null | Value::Undefined => {
                    return Err(ScriptError::type_error(
                        span,
                        format!(
                            "Cannot read properties of {} (reading '{}')",
                            receiver.type_name(),
                            property
                        ),
                    ));
                }
                _ => {
                    return Err(ScriptError::type_error(
                        span,
                        format!("{} is not a function", property),
                    ));
                }
            }
        }

        let function = self.evaluate_expression(callee)?;
        let arg_values = self.evaluate_args(args)?;
        match function {
            Value::Function(_) | Value::Native(_) => self.call_value(function, &arg_values, span),
            other => {
                let label = match callee {
                    Expr::Variable { name, .. } => name.clone(),
                    _ => other.type_name().to_string(),
                };
                Err(ScriptError::type_error(
                    span,
                    format!("{} is not a function", label),
                ))
            }
        }
    }

    fn evaluate_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, ScriptError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.evaluate_expression(arg)?);
        }
        Ok(values)
    }

    fn call_value(
        &mut self,
        function: Value,
        args: &[Value],
        span: Span,
    ) -> Result<Value, ScriptError> {
        match function {
            Value::Native(native) => (native.func)(self, args, span),
            Value::Function(func) => {
                if self.depth >= self.max_depth {
                    return Err(ScriptError::range(
                        span,
                        "Maximum call stack size exceeded".to_string(),
                    ));
                }
                self.depth += 1;

                let previous = self.env.clone();
                let mut call_env = Environment::with_enclosing(func.closure.clone());
                for (i, param) in func.params.iter().enumerate() {
                    call_env.define(param, args.get(i).cloned().unwrap_or(Value::Undefined), false);
                }
                self.env = Rc::new(RefCell::new(call_env));
                self.hoist_functions(&func.body);

                let mut result = Ok(Value::Undefined);
                for statement in &func.body {
                    match self.execute_statement(statement) {
                        Ok(Flow::Normal) => {}
                        Ok(Flow::Return(value, _)) => {
                            result = Ok(value);
                            break;
                        }
                        Ok(other) => {
                            if let Some(err) = illegal_flow_error(other) {
                                result = Err(err);
                            }
                            break;
                        }
                        Err(err) => {
                            result = Err(err);
                            break;
                        }
                    }
                }

                self.env = previous;
                self.depth -= 1;
                result
            }
            other => Err(ScriptError::type_error(
                span,
                format!("{} is not a function", other.type_name()),
            )),
        }
    }

    fn apply_binary(
        &mut self,
        operator: BinaryOp,
        left: Value,
        right: Value,
        span: Span,
    ) -> Result<Value, ScriptError> {
        let value = match operator {
            BinaryOp::Add => {
                if prefers_concat(&left) || prefers_concat(&right) {
                    let left = left.to_js_string();
                    let right = right.to_js_string();
                    check_string_length(left.len().saturating_add(right.len()), span)?;
                    Value::Str(format!("{}{}", left, right))
                } else {
                    Value::Number(left.to_number() + right.to_number())
                }
            }
            BinaryOp::Subtract => Value::Number(left.to_number() - right.to_number()),
            BinaryOp::Multiply => Value::Number(left.to_number() * right.to_number()),
            // IEEE division: x/0 is infinite, 0/0 is NaN
            BinaryOp::Divide => Value::Number(left.to_number() / right.to_number()),
            BinaryOp::Modulo => Value::Number(left.to_number() % right.to_number()),
            BinaryOp::Equal => Value::Bool(left == right),
            BinaryOp::NotEqual => Value::Bool(left != right),
            BinaryOp::Less => Value::Bool(matches!(compare(&left, &right), Some(Ordering::Less))),
            BinaryOp::LessEqual => Value::Bool(matches!(
                compare(&left, &right),
                Some(Ordering::Less | Ordering::Equal)
            )),
            BinaryOp::Greater => {
                Value::Bool(matches!(compare(&left, &right), Some(Ordering::Greater)))
            }
            BinaryOp::GreaterEqual => Value::Bool(matches!(
                compare(&left, &right),
                Some(Ordering::Greater | Ordering::Equal)
            )),
        };
        Ok(value)
    }

    fn call_builtin_method(
        &mut self,
        receiver: &Value,
        method: &str,
        args: &[Value],
        span: Span,
    ) -> Result<Value, ScriptError> {
        match receiver {
            Value::Str(s) => string_method(s, method, args, span),
            Value::Array(items) => array_method(items, method, args, span),
            _ => Err(ScriptError::type_error(
                span,
                format!("{} is not a function", method),
            )),
        }
    }

    fn tick(&mut self, span: Span) -> Result<(), ScriptError> {
        if self.fuel == 0 {
            return Err(ScriptError::budget(span, "fuel budget exhausted".to_string()));
        }
        self.fuel -= 1;
        self.steps += 1;

        if self.steps % CHECK_INTERVAL == 0 {
            if self.cancel.is_cancelled() {
                return Err(ScriptError::budget(span, "run cancelled".to_string()));
            }
            if Instant::now() >= self.deadline {
                return Err(ScriptError::budget(
                    span,
                    format!("time limit of {}ms exceeded", self.time_limit.as_millis()),
                ));
            }
        }

        Ok(())
    }

    fn install_globals(&mut self) {
        let mut globals = self.globals.borrow_mut();
        globals.define("undefined", Value::Undefined, true);
        globals.define("NaN", Value::Number(f64::NAN), true);
        globals.define("Infinity", Value::Number(f64::INFINITY), true);

        let mut console = ObjectData::new();
        console.set("log", Value::native("log", native_console_log));
        console.set("error", Value::native("error", native_console_error));
        console.set("warn", Value::native("warn", native_console_warn));
        console.set("info", Value::native("info", native_console_info));
        console.set("table", Value::native("table", native_console_table));
        console.set("time", Value::native("time", native_console_time));
        console.set("timeEnd", Value::native("timeEnd", native_console_time_end));
        globals.define("console", Value::object(console), true);

        let mut math = ObjectData::new();
        math.set("abs", Value::native("abs", native_math_abs));
        math.set("floor", Value::native("floor", native_math_floor));
        math.set("ceil", Value::native("ceil", native_math_ceil));
        math.set("round", Value::native("round", native_math_round));
        math.set("sqrt", Value::native("sqrt", native_math_sqrt));
        math.set("trunc", Value::native("trunc", native_math_trunc));
        math.set("min", Value::native("min", native_math_min));
        math.set("max", Value::native("max", native_math_max));
        math.set("pow", Value::native("pow", native_math_pow));
        math.set("PI", Value::Number(std::f64::consts::PI));
        math.set("E", Value::Number(std::f64::consts::E));
        globals.define("Math", Value::object(math), true);

        globals.define("String", Value::native("String", native_string), true);
        globals.define("Number", Value::native("Number", native_number), true);
        globals.define("Boolean", Value::native("Boolean", native_boolean), true);
        globals.define("Error", Value::native("Error", native_error), true);
        globals.define("parseInt", Value::native("parseInt", native_parse_int), true);
        globals.define(
            "parseFloat",
            Value::native("parseFloat", native_parse_float),
            true,
        );
        globals.define("isNaN", Value::native("isNaN", native_is_nan), true);
    }
}

fn illegal_flow_error(flow: Flow) -> Option<ScriptError> {
    match flow {
        Flow::Normal => None,
        Flow::Break(span) => Some(ScriptError::syntax(
            span,
            "Illegal break statement".to_string(),
        )),
        Flow::Continue(span) => Some(ScriptError::syntax(
            span,
            "Illegal continue statement".to_string(),
        )),
        Flow::Return(_, span) => Some(ScriptError::syntax(
            span,
            "Illegal return statement".to_string(),
        )),
    }
}

fn thrown_error(value: Value, span: Span) -> ScriptError {
    let message = match &value {
        Value::Object(data) => {
            let data = data.borrow();
            match (data.get("name"), data.get("message")) {
                (Some(Value::Str(name)), Some(Value::Str(msg))) => format!("{}: {}", name, msg),
                _ => value.to_string(),
            }
        }
        other => other.to_string(),
    };
    ScriptError::thrown(span, message)
}

fn prefers_concat(value: &Value) -> bool {
    matches!(
        value,
        Value::Str(_)
            | Value::Array(_)
            | Value::Object(_)
            | Value::Function(_)
            | Value::Native(_)
    )
}

fn check_string_length(len: usize, span: Span) -> Result<(), ScriptError> {
    if len > MAX_STRING_LENGTH {
        return Err(ScriptError::range(span, "Invalid string length".to_string()));
    }
    Ok(())
}

/// String comparison when both sides are strings, numeric otherwise.
/// NaN on either side compares as nothing.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    }
}

fn arg_number(args: &[Value], index: usize) -> f64 {
    args.get(index).map(|v| v.to_number()).unwrap_or(f64::NAN)
}

/// Negative offsets count from the end; results are clamped to the length.
fn slice_bounds(len: usize, start: Option<f64>, end: Option<f64>) -> (usize, usize) {
    let resolve = |n: f64| -> usize {
        if n.is_nan() {
            0
        } else if n < 0.0 {
            (len as f64 + n).max(0.0) as usize
        } else {
            (n as usize).min(len)
        }
    };
    let from = resolve(start.unwrap_or(0.0));
    let to = resolve(end.unwrap_or(len as f64));
    (from, to)
}

fn string_method(
    s: &str,
    method: &str,
    args: &[Value],
    span: Span,
) -> Result<Value, ScriptError> {
    match method {
        "toUpperCase" => Ok(Value::Str(s.to_uppercase())),
        "toLowerCase" => Ok(Value::Str(s.to_lowercase())),
        "trim" => Ok(Value::Str(s.trim().to_string())),
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let (from, to) = slice_bounds(
                chars.len(),
                args.first().map(|v| v.to_number()),
                args.get(1).map(|v| v.to_number()),
            );
            if from < to {
                Ok(Value::Str(chars[from..to].iter().collect()))
            } else {
                Ok(Value::Str(String::new()))
            }
        }
        "indexOf" => {
            let needle = args.first().map(|v| v.to_js_string()).unwrap_or_default();
            match s.find(&needle) {
                Some(byte_index) => Ok(Value::Number(s[..byte_index].chars().count() as f64)),
                None => Ok(Value::Number(-1.0)),
            }
        }
        "repeat" => {
            let n = arg_number(args, 0);
            if n.is_nan() {
                return Ok(Value::Str(String::new()));
            }
            if n < 0.0 || !n.is_finite() {
                return Err(ScriptError::range(span, "Invalid count value".to_string()));
            }
            let count = n.trunc() as usize;
            if s.chars().count().saturating_mul(count) > MAX_STRING_LENGTH {
                return Err(ScriptError::range(span, "Invalid string length".to_string()));
            }
            Ok(Value::Str(s.repeat(count)))
        }
        "split" => {
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Undefined) => vec![Value::Str(s.to_string())],
                Some(separator) => {
                    let separator = separator.to_js_string();
                    if separator.is_empty() {
                        s.chars().map(|c| Value::Str(c.to_string())).collect()
                    } else {
                        s.split(separator.as_str())
                            .map(|part| Value::Str(part.to_string()))
                            .collect()
                    }
                }
            };
            Ok(Value::array(parts))
        }
        "charAt" => {
            let n = arg_number(args, 0);
            let n = if n.is_nan() { 0.0 } else { n.trunc() };
            if n < 0.0 {
                return Ok(Value::Str(String::new()));
            }
            Ok(Value::Str(
                s.chars()
                    .nth(n as usize)
                    .map(|c| c.to_string())
                    .unwrap_or_default(),
            ))
        }
        _ => Err(ScriptError::type_error(
            span,
            format!("{} is not a function", method),
        )),
    }
}

fn array_method(
    items: &Rc<RefCell<Vec<Value>>>,
    method: &str,
    args: &[Value],
    span: Span,
) -> Result<Value, ScriptError> {
    match method {
        "push" => {
            items.borrow_mut().extend(args.iter().cloned());
            Ok(Value::Number(items.borrow().len() as f64))
        }
        "pop" => Ok(items.borrow_mut().pop().unwrap_or(Value::Undefined)),
        "join" => {
            let separator = match args.first() {
                None | Some(Value::Undefined) => ",".to_string(),
                Some(sep) => sep.to_js_string(),
            };
            let items = items.borrow();
            let mut joined = String::new();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    joined.push_str(&separator);
                }
                match item {
                    // Holes render empty in joins
                    Value::Undefined | Value::Null => {}
                    other => joined.push_str(&other.to_js_string()),
                }
                check_string_length(joined.len(), span)?;
            }
            Ok(Value::Str(joined))
        }
        "indexOf" => {
            let needle = args.first().cloned().unwrap_or(Value::Undefined);
            let position = items.borrow().iter().position(|v| *v == needle);
            Ok(Value::Number(
                position.map(|i| i as f64).unwrap_or(-1.0),
            ))
        }
        "slice" => {
            let items = items.borrow();
            let (from, to) = slice_bounds(
                items.len(),
                args.first().map(|v| v.to_number()),
                args.get(1).map(|v| v.to_number()),
            );
            let sliced = if from < to {
                items[from..to].to_vec()
            } else {
                Vec::new()
            };
            Ok(Value::array(sliced))
        }
        _ => Err(ScriptError::type_error(
            span,
            format!("{} is not a function", method),
        )),
    }
}

/// Containers go through the structural serializer, falling back to the
/// display form when the value is too deep or cyclic.
fn render_console_arg(value: &Value) -> String {
    match value {
        Value::Array(_) | Value::Object(_) => serde_json::to_string(&JsonView::new(value))
            .unwrap_or_else(|_| value.to_string()),
        other => other.to_string(),
    }
}

fn render_console_args(args: &[Value]) -> String {
    args.iter()
        .map(render_console_arg)
        .collect::<Vec<_>>()
        .join(" ")
}

fn native_console_log(
    evaluator: &mut Evaluator,
    args: &[Value],
    _span: Span,
) -> Result<Value, ScriptError> {
    let text = render_console_args(args);
    evaluator.console.push(EntryKind::Log, text);
    Ok(Value::Undefined)
}

fn native_console_error(
    evaluator: &mut Evaluator,
    args: &[Value],
    _span: Span,
) -> Result<Value, ScriptError> {
    let text = render_console_args(args);
    evaluator.console.push(EntryKind::Error, text);
    Ok(Value::Undefined)
}

fn native_console_warn(
    evaluator: &mut Evaluator,
    args: &[Value],
    _span: Span,
) -> Result<Value, ScriptError> {
    let text = render_console_args(args);
    evaluator.console.push(EntryKind::Warn, text);
    Ok(Value::Undefined)
}

fn native_console_info(
    evaluator: &mut Evaluator,
    args: &[Value],
    _span: Span,
) -> Result<Value, ScriptError> {
    let text = render_console_args(args);
    evaluator.console.push(EntryKind::Info, text);
    Ok(Value::Undefined)
}

fn native_console_table(
    evaluator: &mut Evaluator,
    args: &[Value],
    _span: Span,
) -> Result<Value, ScriptError> {
    let value = args.first().cloned().unwrap_or(Value::Undefined);
    let text = render_table(&value).unwrap_or_else(|| render_console_arg(&value));
    evaluator.console.push(EntryKind::Log, text);
    Ok(Value::Undefined)
}

fn native_console_time(
    evaluator: &mut Evaluator,
    args: &[Value],
    _span: Span,
) -> Result<Value, ScriptError> {
    let label = timer_label(args);
    if evaluator.timers.iter().any(|(name, _)| *name == label) {
        evaluator
            .console
            .push(EntryKind::Warn, format!("Timer '{}' already exists", label));
    } else {
        evaluator.timers.push((label, Instant::now()));
    }
    Ok(Value::Undefined)
}

fn native_console_time_end(
    evaluator: &mut Evaluator,
    args: &[Value],
    _span: Span,
) -> Result<Value, ScriptError> {
    let label = timer_label(args);
    match evaluator.timers.iter().position(|(name, _)| *name == label) {
        Some(index) => {
            let (_, started) = evaluator.timers.remove(index);
            let ms = started.elapsed().as_secs_f64() * 1000.0;
            evaluator
                .console
                .push(EntryKind::Info, format!("{}: {:.3}ms", label, ms));
        }
        None => {
            evaluator
                .console
                .push(EntryKind::Warn, format!("Timer '{}' does not exist", label));
        }
    }
    Ok(Value::Undefined)
}

fn timer_label(args: &[Value]) -> String {
    match args.first() {
        None | Some(Value::Undefined) => "default".to_string(),
        Some(value) => value.to_js_string(),
    }
}

/// Aligned text table for arrays of objects, arrays of plain values, and
/// plain objects. Anything else falls back to regular log rendering.
fn render_table(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => {
            let rows = items.borrow().clone();
            let all_objects = !rows.is_empty()
                && rows.iter().all(|row| matches!(row, Value::Object(_)));

            if all_objects {
                let mut columns: Vec<String> = Vec::new();
                for row in &rows {
                    if let Value::Object(data) = row {
                        for (key, _) in &data.borrow().entries {
                            if !columns.contains(key) {
                                columns.push(key.clone());
                            }
                        }
                    }
                }

                let mut header = vec!["(index)".to_string()];
                header.extend(columns.iter().cloned());

                let mut body = Vec::new();
                for (i, row) in rows.iter().enumerate() {
                    let mut cells = vec![i.to_string()];
                    if let Value::Object(data) = row {
                        let data = data.borrow();
                        for column in &columns {
                            cells.push(
                                data.get(column)
                                    .map(|v| v.inspect())
                                    .unwrap_or_default(),
                            );
                        }
                    }
                    body.push(cells);
                }
                Some(layout_table(&header, &body))
            } else {
                let header = vec!["(index)".to_string(), "Values".to_string()];
                let body = rows
                    .iter()
                    .enumerate()
                    .map(|(i, row)| vec![i.to_string(), row.inspect()])
                    .collect::<Vec<_>>();
                Some(layout_table(&header, &body))
            }
        }
        Value::Object(data) => {
            let header = vec!["(index)".to_string(), "Values".to_string()];
            let body = data
                .borrow()
                .entries
                .iter()
                .map(|(key, val)| vec![key.clone(), val.inspect()])
                .collect::<Vec<_>>();
            Some(layout_table(&header, &body))
        }
        _ => None,
    }
}

fn layout_table(header: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let render_row = |cells: &[String]| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:<width$}", cell, width = widths[i]))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let separator = widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>()
        .join(" | ");

    let mut lines = vec![render_row(header), separator];
    for row in rows {
        lines.push(render_row(row));
    }
    lines.join("\n")
}

fn native_math_abs(_: &mut Evaluator, args: &[Value], _: Span) -> Result<Value, ScriptError> {
    Ok(Value::Number(arg_number(args, 0).abs()))
}

fn native_math_floor(_: &mut Evaluator, args: &[Value], _: Span) -> Result<Value, ScriptError> {
    Ok(Value::Number(arg_number(args, 0).floor()))
}

fn native_math_ceil(_: &mut Evaluator, args: &[Value], _: Span) -> Result<Value, ScriptError> {
    Ok(Value::Number(arg_number(args, 0).ceil()))
}

fn native_math_round(_: &mut Evaluator, args: &[Value], _: Span) -> Result<Value, ScriptError> {
    // Halfway cases round toward positive infinity
    Ok(Value::Number((arg_number(args, 0) + 0.5).floor()))
}

fn native_math_sqrt(_: &mut Evaluator, args: &[Value], _: Span) -> Result<Value, ScriptError> {
    Ok(Value::Number(arg_number(args, 0).sqrt()))
}

fn native_math_trunc(_: &mut Evaluator, args: &[Value], _: Span) -> Result<Value, ScriptError> {
    Ok(Value::Number(arg_number(args, 0).trunc()))
}

fn native_math_min(_: &mut Evaluator, args: &[Value], _: Span) -> Result<Value, ScriptError> {
    let mut best = f64::INFINITY;
    for arg in args {
        let n = arg.to_number();
        if n.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        if n < best {
            best = n;
        }
    }
    Ok(Value::Number(best))
}

fn native_math_max(_: &mut Evaluator, args: &[Value], _: Span) -> Result<Value, ScriptError> {
    let mut best = f64::NEG_INFINITY;
    for arg in args {
        let n = arg.to_number();
        if n.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        if n > best {
            best = n;
        }
    }
    Ok(Value::Number(best))
}

fn native_math_pow(_: &mut Evaluator, args: &[Value], _: Span) -> Result<Value, ScriptError> {
    Ok(Value::Number(arg_number(args, 0).powf(arg_number(args, 1))))
}

fn native_string(_: &mut Evaluator, args: &[Value], _: Span) -> Result<Value, ScriptError> {
    Ok(Value::Str(
        args.first().map(|v| v.to_js_string()).unwrap_or_default(),
    ))
}

fn native_number(_: &mut Evaluator, args: &[Value], _: Span) -> Result<Value, ScriptError> {
    Ok(Value::Number(
        args.first().map(|v| v.to_number()).unwrap_or(0.0),
    ))
}

fn native_boolean(_: &mut Evaluator, args: &[Value], _: Span) -> Result<Value, ScriptError> {
    Ok(Value::Bool(
        args.first().map(|v| v.is_truthy()).unwrap_or(false),
    ))
}

fn native_error(_: &mut Evaluator, args: &[Value], _: Span) -> Result<Value, ScriptError> {
    let message = args.first().map(|v| v.to_js_string()).unwrap_or_default();
    let mut data = ObjectData::new();
    data.set("name", Value::Str("Error".to_string()));
    data.set("message", Value::Str(message));
    Ok(Value::object(data))
}

fn native_parse_int(_: &mut Evaluator, args: &[Value], _: Span) -> Result<Value, ScriptError> {
    let text = args.first().map(|v| v.to_js_string()).unwrap_or_default();
    let text = text.trim();

    let explicit_radix = args
        .get(1)
        .map(|v| v.to_number())
        .filter(|n| n.fract() == 0.0 && (2.0..=36.0).contains(n))
        .map(|n| n as u32);

    let (sign, rest) = match text.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, text.strip_prefix('+').unwrap_or(text)),
    };

    let mut radix = explicit_radix.unwrap_or(10);
    let mut digits = rest;
    if (explicit_radix.is_none() || explicit_radix == Some(16))
        && (digits.starts_with("0x") || digits.starts_with("0X"))
    {
        radix = 16;
        digits = &digits[2..];
    }

    let mut value = 0.0f64;
    let mut seen = false;
    for c in digits.chars() {
        match c.to_digit(radix) {
            Some(d) => {
                value = value * radix as f64 + d as f64;
                seen = true;
            }
            None => break,
        }
    }

    if seen {
        Ok(Value::Number(sign * value))
    } else {
        Ok(Value::Number(f64::NAN))
    }
}

fn native_parse_float(_: &mut Evaluator, args: &[Value], _: Span) -> Result<Value, ScriptError> {
    let text = args.first().map(|v| v.to_js_string()).unwrap_or_default();
    let text = text.trim();

    for (prefix, value) in [
        ("Infinity", f64::INFINITY),
        ("+Infinity", f64::INFINITY),
        ("-Infinity", f64::NEG_INFINITY),
    ] {
        if text.starts_with(prefix) {
            return Ok(Value::Number(value));
        }
    }

    Ok(Value::Number(float_prefix(text).unwrap_or(f64::NAN)))
}

/// Longest leading substring that reads as a decimal float.
fn float_prefix(text: &str) -> Option<f64> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut i = 0;

    if i < len && (chars[i] == '+' || chars[i] == '-') {
        i += 1;
    }
    let mut seen_digit = false;
    while i < len && chars[i].is_ascii_digit() {
        i += 1;
        seen_digit = true;
    }
    if i < len && chars[i] == '.' {
        i += 1;
        while i < len && chars[i].is_ascii_digit() {
            i += 1;
            seen_digit = true;
        }
    }
    if !seen_digit {
        return None;
    }

    let mut end = i;
    if i < len && (chars[i] == 'e' || chars[i] == 'E') {
        let mut j = i + 1;
        if j < len && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        let mut exp_digit = false;
        while j < len && chars[j].is_ascii_digit() {
            j += 1;
            exp_digit = true;
        }
        if exp_digit {
            end = j;
        }
    }

    let prefix: String = chars[..end].iter().collect();
    prefix.parse().ok()
}

fn native_is_nan(_: &mut Evaluator, args: &[Value], _: Span) -> Result<Value, ScriptError> {
    Ok(Value::Bool(arg_number(args, 0).is_nan()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::script::lexer::Lexer;
    use crate::script::parser::Parser;

    fn run_with(source: &str, limits: &RunLimits) -> (Result<Option<Value>, ScriptError>, Vec<OutputEntry>) {
        let tokens = Lexer::new(source).scan_tokens().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        let mut evaluator = Evaluator::new(limits, CancelHandle::new());
        let result = evaluator.evaluate_program(&program);
        let entries = evaluator.drain_output();
        (result, entries)
    }

    fn run(source: &str) -> Result<Option<Value>, ScriptError> {
        run_with(source, &RunLimits::default()).0
    }

    fn eval(source: &str) -> Value {
        run(source).unwrap().unwrap()
    }

    fn output(source: &str) -> Vec<OutputEntry> {
        let (result, entries) = run_with(source, &RunLimits::default());
        result.unwrap();
        entries
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3"), Value::Number(7.0));
        assert_eq!(eval("(1 + 2) * 3"), Value::Number(9.0));
        assert_eq!(eval("10 % 3"), Value::Number(1.0));
        assert_eq!(eval("2 * 3 - 1"), Value::Number(5.0));
    }

    #[test]
    fn division_follows_ieee() {
        assert_eq!(eval("1 / 0"), Value::Number(f64::INFINITY));
        assert_eq!(eval("-1 / 0"), Value::Number(f64::NEG_INFINITY));
        assert!(matches!(eval("0 / 0"), Value::Number(n) if n.is_nan()));
    }

    #[test]
    fn addition_concatenates_with_strings_and_containers() {
        assert_eq!(eval("\"a\" + 1"), Value::Str("a1".to_string()));
        assert_eq!(eval("1 + 2 + \"3\""), Value::Str("33".to_string()));
        assert_eq!(eval("[1, 2] + 3"), Value::Str("1,23".to_string()));
        assert_eq!(eval("({}) + \"\""), Value::Str("[object Object]".to_string()));
        assert!(matches!(eval("undefined + 1"), Value::Number(n) if n.is_nan()));
        assert_eq!(eval("null + 1"), Value::Number(1.0));
        assert_eq!(eval("true + true"), Value::Number(2.0));
    }

    #[test]
    fn comparisons() {
        assert_eq!(eval("2 < 10"), Value::Bool(true));
        // Both strings: lexicographic
        assert_eq!(eval("\"2\" < \"10\""), Value::Bool(false));
        // Mixed: numeric
        assert_eq!(eval("\"2\" < 10"), Value::Bool(true));
        assert_eq!(eval("NaN < 1"), Value::Bool(false));
        assert_eq!(eval("NaN >= 1"), Value::Bool(false));
    }

    #[test]
    fn strict_equality_only() {
        assert_eq!(eval("1 === 1"), Value::Bool(true));
        assert_eq!(eval("1 == \"1\""), Value::Bool(false));
        assert_eq!(eval("null == undefined"), Value::Bool(false));
        assert_eq!(eval("NaN === NaN"), Value::Bool(false));
        assert_eq!(eval("[] === []"), Value::Bool(false));
        assert_eq!(eval("let a = [1]; a === a"), Value::Bool(true));
    }

    #[test]
    fn block_scoping_and_shadowing() {
        assert_eq!(eval("let x = 1; { let x = 2; } x"), Value::Number(1.0));
        assert_eq!(eval("let y = 1; { y = 2; } y"), Value::Number(2.0));
    }

    #[test]
    fn const_assignment_is_a_type_error() {
        let err = run("const c = 1; c = 2").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
        assert!(err.message.contains("Assignment to constant variable"));
    }

    #[test]
    fn undeclared_reads_and_writes_are_reference_errors() {
        let err = run("missing").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Reference);
        assert_eq!(err.message, "missing is not defined");

        let err = run("q = 5").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Reference);
    }

    #[test]
    fn redeclaration_in_same_scope_errors() {
        let err = run("let x = 1; let x = 2").unwrap_err();
        assert!(err.message.contains("already been declared"));
    }

    #[test]
    fn loops_accumulate() {
        assert_eq!(
            eval("let s = 0; for (let i = 0; i < 5; i++) { s += i } s"),
            Value::Number(10.0)
        );
        assert_eq!(
            eval("let n = 0; while (n < 4) { n += 1 } n"),
            Value::Number(4.0)
        );
    }

    #[test]
    fn break_and_continue() {
        assert_eq!(
            eval("let s = 0; for (let i = 0; i < 10; i++) { if (i === 3) continue; if (i > 5) break; s += i } s"),
            Value::Number(12.0)
        );
    }

    #[test]
    fn closures_capture_environment() {
        let source = "function make() { let n = 0; return () => { n += 1; return n; }; }\nlet c = make();\nc(); c(); c()";
        assert_eq!(eval(source), Value::Number(3.0));
    }

    #[test]
    fn function_declarations_hoist() {
        assert_eq!(eval("let x = f(); function f() { return 7 } x"), Value::Number(7.0));
    }

    #[test]
    fn deep_recursion_is_a_range_error() {
        let err = run("function f() { return f() } f()").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
        assert!(err.message.contains("Maximum call stack size exceeded"));
    }

    #[test]
    fn fuel_exhaustion_is_a_budget_error() {
        let limits = RunLimits {
            fuel: 1_000,
            ..RunLimits::default()
        };
        let (result, _) = run_with("while (true) {}", &limits);
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Budget);
        assert!(err.message.contains("fuel"));
    }

    #[test]
    fn deadline_is_a_budget_error() {
        let limits = RunLimits {
            fuel: u64::MAX,
            time_limit: Duration::from_millis(10),
            ..RunLimits::default()
        };
        let (result, _) = run_with("while (true) {}", &limits);
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Budget);
        assert!(err.message.contains("time limit"));
    }

    #[test]
    fn cancellation_stops_the_run() {
        let tokens = Lexer::new("while (true) {}").scan_tokens().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        let cancel = CancelHandle::new();
        cancel.cancel();
        let mut evaluator = Evaluator::new(&RunLimits::default(), cancel);
        let err = evaluator.evaluate_program(&program).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Budget);
        assert!(err.message.contains("cancelled"));
    }

    #[test]
    fn far_index_write_is_a_range_error() {
        let err = run("let a = []; a[4000000000] = 1").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
        assert!(err.message.contains("Invalid array length"));
    }

    #[test]
    fn hole_padding_is_charged_as_steps() {
        let limits = RunLimits {
            fuel: 1_000,
            ..RunLimits::default()
        };
        let (result, _) = run_with("let a = []; a[9000000] = 1", &limits);
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Budget);
        assert!(err.message.contains("fuel"));
    }

    #[test]
    fn runaway_concat_is_a_range_error() {
        let err = run("let s = \"x\"; while (true) { s = s + s }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
        assert!(err.message.contains("Invalid string length"));
    }

    #[test]
    fn runaway_template_growth_is_a_range_error() {
        let err = run("let s = \"x\"; while (true) { s = `${s}${s}` }").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
        assert!(err.message.contains("Invalid string length"));
    }

    #[test]
    fn join_output_is_capped() {
        let source = "let sep = \"x\".repeat(6000000); [1, 2, 3].join(sep)";
        let err = run(source).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
        assert!(err.message.contains("Invalid string length"));
    }

    #[test]
    fn typeof_results() {
        assert_eq!(eval("typeof 1"), Value::Str("number".to_string()));
        assert_eq!(eval("typeof \"s\""), Value::Str("string".to_string()));
        assert_eq!(eval("typeof null"), Value::Str("object".to_string()));
        assert_eq!(eval("typeof []"), Value::Str("object".to_string()));
        assert_eq!(eval("typeof console.log"), Value::Str("function".to_string()));
        // Unresolved names do not throw under typeof
        assert_eq!(eval("typeof nope"), Value::Str("undefined".to_string()));
    }

    #[test]
    fn array_index_writes_pad_with_holes() {
        assert_eq!(eval("let a = [1]; a[3] = 9; a.length"), Value::Number(4.0));
        assert_eq!(eval("let a = [1]; a[3] = 9; a[2]"), Value::Undefined);
        assert_eq!(eval("let a = [1, 2]; a[0] = 5; a[0]"), Value::Number(5.0));
    }

    #[test]
    fn array_methods() {
        assert_eq!(eval("let a = [1]; a.push(2, 3)"), Value::Number(3.0));
        assert_eq!(eval("let a = [1, 2]; a.pop()"), Value::Number(2.0));
        assert_eq!(eval("[].pop()"), Value::Undefined);
        assert_eq!(eval("[1, 2, 3].join(\"-\")"), Value::Str("1-2-3".to_string()));
        assert_eq!(eval("[\"x\", \"y\"].indexOf(\"y\")"), Value::Number(1.0));
        assert_eq!(eval("[1, 2].indexOf(\"1\")"), Value::Number(-1.0));
        assert_eq!(eval("[1, 2, 3, 4].slice(1, 3).join(\",\")"), Value::Str("2,3".to_string()));
        assert_eq!(eval("[1, 2, 3].slice(-2).join(\",\")"), Value::Str("2,3".to_string()));
    }

    #[test]
    fn string_methods() {
        assert_eq!(eval("\"abc\".toUpperCase()"), Value::Str("ABC".to_string()));
        assert_eq!(eval("\"Hello\".slice(-3)"), Value::Str("llo".to_string()));
        assert_eq!(eval("\"hello\".indexOf(\"ll\")"), Value::Number(2.0));
        assert_eq!(eval("\"ab\".repeat(3)"), Value::Str("ababab".to_string()));
        assert_eq!(eval("\"a,b\".split(\",\").length"), Value::Number(2.0));
        assert_eq!(eval("\"abc\".split(\"\").length"), Value::Number(3.0));
        assert_eq!(eval("\"  x \".trim()"), Value::Str("x".to_string()));
        assert_eq!(eval("\"abc\".charAt(1)"), Value::Str("b".to_string()));
        assert_eq!(eval("\"abc\".charAt(9)"), Value::Str(String::new()));
        assert_eq!(eval("\"héllo\".length"), Value::Number(5.0));
    }

    #[test]
    fn negative_repeat_is_a_range_error() {
        let err = run("\"a\".repeat(-1)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
    }

    #[test]
    fn member_access_on_null_is_a_type_error() {
        let err = run("null.x").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
        assert_eq!(err.message, "Cannot read properties of null (reading 'x')");

        let err = run("let o; o.length").unwrap_err();
        assert!(err.message.contains("undefined"));
    }

    #[test]
    fn calling_a_non_function_is_a_type_error() {
        let err = run("let x = 5; x()").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
        assert_eq!(err.message, "x is not a function");

        let err = run("let o = { n: 1 }; o.n()").unwrap_err();
        assert_eq!(err.message, "n is not a function");
    }

    #[test]
    fn object_literals_and_member_access() {
        assert_eq!(eval("let o = { a: 1, b: { c: 2 } }; o.b.c"), Value::Number(2.0));
        assert_eq!(eval("let o = { a: 1 }; o[\"a\"]"), Value::Number(1.0));
        assert_eq!(eval("let o = { a: 1 }; o.missing"), Value::Undefined);
        assert_eq!(eval("let o = {}; o.x = 3; o.x"), Value::Number(3.0));
        // Duplicate keys keep the last value
        assert_eq!(eval("let o = { a: 1, a: 2 }; o.a"), Value::Number(2.0));
    }

    #[test]
    fn logical_operators_return_operands() {
        assert_eq!(eval("null || \"fallback\""), Value::Str("fallback".to_string()));
        assert_eq!(eval("0 && neverEvaluated"), Value::Number(0.0));
        assert_eq!(eval("1 && 2"), Value::Number(2.0));
        assert_eq!(eval("\"a\" || neverEvaluated"), Value::Str("a".to_string()));
    }

    #[test]
    fn template_interpolation() {
        assert_eq!(eval("`2+2=${2 + 2}!`"), Value::Str("2+2=4!".to_string()));
        assert_eq!(
            eval("let name = \"world\"; `hello ${name}`"),
            Value::Str("hello world".to_string())
        );
        assert_eq!(
            eval("`${[1, 2]} and ${ {} }`"),
            Value::Str("1,2 and [object Object]".to_string())
        );
    }

    #[test]
    fn thrown_errors_carry_formatted_messages() {
        let err = run("throw new Error(\"boom\")").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Thrown);
        assert_eq!(err.message, "Error: boom");
        assert_eq!(err.headline(), "Uncaught Error: boom");

        let err = run("throw 42").unwrap_err();
        assert_eq!(err.headline(), "Uncaught 42");

        let err = run("throw \"plain\"").unwrap_err();
        assert_eq!(err.headline(), "Uncaught plain");
    }

    #[test]
    fn console_entries_are_ordered_and_typed() {
        let entries = output("console.log(\"a\", 1)\nconsole.warn(\"w\")\nconsole.error(\"e\")\nconsole.info(\"i\")");
        let kinds: Vec<EntryKind> = entries.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EntryKind::Log, EntryKind::Warn, EntryKind::Error, EntryKind::Info]
        );
        assert_eq!(entries[0].content, "a 1");
    }

    #[test]
    fn console_serializes_containers_structurally() {
        let entries = output("console.log(\"x\", { n: 1, s: \"two\" }, [3, null])");
        assert_eq!(entries[0].content, "x {\"n\":1,\"s\":\"two\"} [3,null]");
    }

    #[test]
    fn cyclic_values_fall_back_to_display_rendering() {
        let entries = output("let a = []; a.push(a); console.log(a)");
        assert!(entries[0].content.contains("[Array]"));
    }

    #[test]
    fn console_table_renders_aligned_columns() {
        let entries = output(
            "console.table([{ name: \"Ada\", age: 36 }, { name: \"Bo\" }])",
        );
        let text = &entries[0].content;
        assert!(text.contains("(index)"));
        assert!(text.contains("name"));
        assert!(text.contains("age"));
        assert!(text.contains("\"Ada\""));
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.len() >= 4);

        let entries = output("console.table([1, 2])");
        assert!(entries[0].content.contains("Values"));
    }

    #[test]
    fn console_timers() {
        let entries = output("console.time(\"t\")\nconsole.timeEnd(\"t\")");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Info);
        assert!(entries[0].content.starts_with("t: "));
        assert!(entries[0].content.ends_with("ms"));

        let entries = output("console.timeEnd(\"missing\")");
        assert_eq!(entries[0].kind, EntryKind::Warn);
        assert!(entries[0].content.contains("does not exist"));

        let entries = output("console.time(\"d\")\nconsole.time(\"d\")");
        assert_eq!(entries[0].kind, EntryKind::Warn);
        assert!(entries[0].content.contains("already exists"));
    }

    #[test]
    fn last_value_tracks_final_expression_statement() {
        assert_eq!(run("1 + 1").unwrap(), Some(Value::Number(2.0)));
        assert_eq!(run("let x = 1").unwrap(), None);
        assert_eq!(run("1; let y = 2").unwrap(), None);
        assert_eq!(run("let z = 3; z").unwrap(), Some(Value::Number(3.0)));
        assert_eq!(run("").unwrap(), None);
    }

    #[test]
    fn illegal_flow_outside_context() {
        let err = run("break").unwrap_err();
        assert!(err.message.contains("Illegal break"));
        let err = run("return 1").unwrap_err();
        assert!(err.message.contains("Illegal return"));
        let err = run("function f() { break }\nf()").unwrap_err();
        assert!(err.message.contains("Illegal break"));
    }

    #[test]
    fn update_expressions_coerce_to_numbers() {
        assert_eq!(eval("let i = 5; i++"), Value::Number(5.0));
        assert_eq!(eval("let i = 5; i++; i"), Value::Number(6.0));
        assert_eq!(eval("let j = 5; ++j"), Value::Number(6.0));
        assert_eq!(eval("let s = \"5\"; s++; s"), Value::Number(6.0));
        assert_eq!(eval("let o = { n: 1 }; o.n++; o.n"), Value::Number(2.0));
    }

    #[test]
    fn compound_assignment_on_members_evaluates_target_once() {
        let source = "let calls = 0;\nlet a = [10];\nfunction pick() { calls += 1; return a; }\npick()[0] += 5;\ncalls";
        assert_eq!(eval(source), Value::Number(1.0));
        assert_eq!(eval("let o = { n: 1 }; o.n += 2; o.n"), Value::Number(3.0));
    }

    #[test]
    fn conversion_globals() {
        assert_eq!(eval("String(5)"), Value::Str("5".to_string()));
        assert_eq!(eval("String()"), Value::Str(String::new()));
        assert_eq!(eval("Number(\"12\")"), Value::Number(12.0));
        assert_eq!(eval("Boolean(\"\")"), Value::Bool(false));
        assert_eq!(eval("parseInt(\"12px\")"), Value::Number(12.0));
        assert_eq!(eval("parseInt(\"0xFF\")"), Value::Number(255.0));
        assert_eq!(eval("parseInt(\"101\", 2)"), Value::Number(5.0));
        assert!(matches!(eval("parseInt(\"px\")"), Value::Number(n) if n.is_nan()));
        assert_eq!(eval("parseFloat(\"2.5e2x\")"), Value::Number(250.0));
        assert_eq!(eval("parseFloat(\"-3.5\")"), Value::Number(-3.5));
        assert!(matches!(eval("parseFloat(\"x\")"), Value::Number(n) if n.is_nan()));
        assert_eq!(eval("isNaN(\"abc\")"), Value::Bool(true));
        assert_eq!(eval("isNaN(\"12\")"), Value::Bool(false));
    }

    #[test]
    fn math_globals() {
        assert_eq!(eval("Math.abs(-3)"), Value::Number(3.0));
        assert_eq!(eval("Math.floor(2.9)"), Value::Number(2.0));
        assert_eq!(eval("Math.ceil(2.1)"), Value::Number(3.0));
        assert_eq!(eval("Math.round(2.5)"), Value::Number(3.0));
        // Halfway rounds toward positive infinity
        assert_eq!(eval("Math.round(-2.5)"), Value::Number(-2.0));
        assert_eq!(eval("Math.sqrt(9)"), Value::Number(3.0));
        assert_eq!(eval("Math.trunc(-2.7)"), Value::Number(-2.0));
        assert_eq!(eval("Math.min(3, 1, 2)"), Value::Number(1.0));
        assert_eq!(eval("Math.max(3, 1, 2)"), Value::Number(3.0));
        assert_eq!(eval("Math.min()"), Value::Number(f64::INFINITY));
        assert_eq!(eval("Math.pow(2, 10)"), Value::Number(1024.0));
        assert_eq!(eval("Math.floor(Math.PI)"), Value::Number(3.0));
    }

    #[test]
    fn new_expression_calls_the_constructor() {
        assert_eq!(
            eval("let e = new Error(\"bad\"); e.message"),
            Value::Str("bad".to_string())
        );
        assert_eq!(eval("new Error(\"bad\").name"), Value::Str("Error".to_string()));
        let err = run("new 5()").unwrap_err();
        assert!(err.message.contains("not a constructor"));
    }

    #[test]
    fn ternary_selects_branch() {
        assert_eq!(eval("1 ? \"a\" : \"b\""), Value::Str("a".to_string()));
        assert_eq!(eval("0 ? \"a\" : \"b\""), Value::Str("b".to_string()));
    }

    #[test]
    fn repl_style_budget_reset_keeps_globals() {
        let limits = RunLimits::default();
        let mut evaluator = Evaluator::new(&limits, CancelHandle::new());

        let tokens = Lexer::new("let counter = 10").scan_tokens().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        evaluator.evaluate_program(&program).unwrap();

        evaluator.reset_budget(&limits, CancelHandle::new());
        let tokens = Lexer::new("counter + 1").scan_tokens().unwrap();
        let program = Parser::new(tokens).parse().unwrap();
        assert_eq!(
            evaluator.evaluate_program(&program).unwrap(),
            Some(Value::Number(11.0))
        );
    }
}
