//! Text rendering of expressions and modules.
//!
//! The format is for diagnostics and snapshot tests; nothing parses it back.
//! Shared nodes are printed at every use.

use std::fmt::{self, Formatter, Write};

use crate::{Callee, Expr, ExprKind, Function, Module};

struct Printer {
    indent: usize,
}

impl Printer {
    fn new() -> Self {
        Self { indent: 0 }
    }

    fn pad(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for _ in 0..self.indent {
            f.write_str("  ")?;
        }
        Ok(())
    }

    fn expr(&mut self, f: &mut Formatter<'_>, expr: &Expr) -> fmt::Result {
        match expr.kind() {
            ExprKind::Var(var) => write!(f, "%{}", var.name),
            ExprKind::GlobalVar(gv) => write!(f, "{gv}"),
            ExprKind::Constant(value) => write!(f, "{value}"),
            ExprKind::Call(call) => {
                match &call.callee {
                    Callee::Op(op) => write!(f, "{op}")?,
                    Callee::Func(func) if func.as_function().is_some() => {
                        f.write_char('(')?;
                        self.expr(f, func)?;
                        f.write_char(')')?;
                    }
                    Callee::Func(func) => self.expr(f, func)?,
                }
                f.write_char('(')?;
                let mut sep = Separator::new(", ");
                for arg in &call.args {
                    sep.write(f)?;
                    self.expr(f, arg)?;
                }
                if !call.attrs.is_none() {
                    sep.write(f)?;
                    write!(f, "{}", call.attrs)?;
                }
                if !call.type_args.is_empty() {
                    sep.write(f)?;
                    f.write_str("type_args=[")?;
                    let mut inner = Separator::new(", ");
                    for ty in &call.type_args {
                        inner.write(f)?;
                        write!(f, "{ty}")?;
                    }
                    f.write_char(']')?;
                }
                f.write_char(')')
            }
            ExprKind::Function(func) => self.function(f, "fn ", func),
            ExprKind::Tuple(fields) => {
                f.write_char('(')?;
                let mut sep = Separator::new(", ");
                for field in fields {
                    sep.write(f)?;
                    self.expr(f, field)?;
                }
                if fields.len() == 1 {
                    f.write_char(',')?;
                }
                f.write_char(')')
            }
            ExprKind::TupleGetItem(item) => {
                self.expr(f, &item.tuple)?;
                write!(f, ".{}", item.index)
            }
            ExprKind::Let(binding) => {
                f.write_str("let ")?;
                self.binder(f, &binding.var)?;
                f.write_str(" = ")?;
                self.expr(f, &binding.value)?;
                f.write_str(";\n")?;
                self.pad(f)?;
                self.expr(f, &binding.body)
            }
        }
    }

    fn binder(&mut self, f: &mut Formatter<'_>, var: &Expr) -> fmt::Result {
        match var.as_var() {
            Some(v) => {
                write!(f, "%{}", v.name)?;
                if let Some(ty) = &v.ty {
                    write!(f, ": {ty}")?;
                }
                Ok(())
            }
            None => self.expr(f, var),
        }
    }

    fn function(&mut self, f: &mut Formatter<'_>, head: &str, func: &Function) -> fmt::Result {
        f.write_str(head)?;
        if !func.type_params.is_empty() {
            f.write_char('<')?;
            let mut sep = Separator::new(", ");
            for tv in &func.type_params {
                sep.write(f)?;
                write!(f, "{}", tv.0)?;
            }
            f.write_char('>')?;
        }
        f.write_char('(')?;
        let mut sep = Separator::new(", ");
        for param in &func.params {
            sep.write(f)?;
            self.binder(f, param)?;
        }
        f.write_char(')')?;
        if let Some(ret) = &func.ret_type {
            write!(f, " -> {ret}")?;
        }
        if !func.attrs.is_empty() {
            f.write_str(" [")?;
            let mut sep = Separator::new(", ");
            for (key, value) in &func.attrs {
                sep.write(f)?;
                write!(f, "{key}={value:?}")?;
            }
            f.write_char(']')?;
        }
        f.write_str(" {\n")?;
        self.indent += 1;
        self.pad(f)?;
        self.expr(f, &func.body)?;
        self.indent -= 1;
        f.write_char('\n')?;
        self.pad(f)?;
        f.write_char('}')
    }
}

struct Separator {
    text: &'static str,
    first: bool,
}

impl Separator {
    fn new(text: &'static str) -> Self {
        Self { text, first: true }
    }

    fn write(&mut self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.first {
            self.first = false;
            Ok(())
        } else {
            f.write_str(self.text)
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Printer::new().expr(f, self)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut printer = Printer::new();
        for (i, (gv, func)) in self.functions().enumerate() {
            if i > 0 {
                f.write_str("\n\n")?;
            }
            match func.as_function() {
                Some(function) => printer.function(f, &format!("def {gv}"), function)?,
                None => write!(f, "def {gv} = {func}")?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use crate::attrs::ReshapeAttrs;
    use crate::{DType, Expr, GlobalVar, Module, OpRegistry, Tensor, Type, ops};

    #[test]
    fn print_dynamic_reshape_function() {
        let registry = OpRegistry::global();
        let x = Expr::var("x", Some(Type::tensor(&[6], DType::Float32)));
        let shape = Expr::constant(Tensor::vector_i64(&[2, 3]));
        let body = Expr::call(
            registry.lookup(ops::DYN_RESHAPE).unwrap(),
            [x.clone(), shape],
            crate::Attrs::None,
        );
        let func = Expr::function(vec![x], body, Some(Type::tensor(&[2, 3], DType::Float32)));

        assert_snapshot!(func.to_string(), @r"
        fn (%x: Tensor[(6,), float32]) -> Tensor[(2, 3), float32] {
          dyn.reshape(%x, [2, 3])
        }
        ");
    }

    #[test]
    fn print_module_with_let_and_tuple() {
        let registry = OpRegistry::global();
        let reshape = registry.lookup(ops::RESHAPE).unwrap();
        let x = Expr::var("x", Some(Type::tensor(&[2, 2], DType::Int64)));
        let y = Expr::var("y", None);
        let value = Expr::call(
            reshape,
            [x.clone()],
            ReshapeAttrs {
                newshape: vec![-1],
                reverse: false,
            },
        );
        let body = Expr::let_(
            y.clone(),
            value,
            Expr::tuple_get_item(Expr::tuple([y.clone(), x.clone()]), 0),
        );
        let mut module = Module::new();
        let main = GlobalVar::new("main");
        module.update(main, Expr::function(vec![x.clone()], body, None));
        module.add(
            "caller",
            Expr::function(vec![x.clone()], Expr::call_func(Expr::global(main), [x]), None),
        );

        assert_snapshot!(module.to_string(), @r"
        def @caller(%x: Tensor[(2, 2), int64]) {
          @main(%x)
        }

        def @main(%x: Tensor[(2, 2), int64]) {
          let %y = reshape(%x, newshape=[-1], reverse=false);
          (%y, %x).0
        }
        ");
    }
}
