use crate::hotswap::{DeployStackResult, HotswapOperation};
use crate::stack::CloudFormationStack;
use eyre::{Result, WrapErr};
use std::fmt::Debug;
use std::io::Write;
use std::time::Duration;
use term_table::row::Row;
use term_table::table_cell::TableCell;
use term_table::Table;
use termcolor::{Color, ColorSpec, StandardStreamLock, WriteColor};

pub(crate) struct Writer<'a>(StandardStreamLock<'a>);

impl<'a> Writer<'a> {
    pub(crate) fn new(inner: StandardStreamLock<'a>) -> Self {
        Self(inner)
    }
}

impl<'a> Debug for Writer<'a> {
    fn fmt(&self, w: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        w.write_str("writer")
    }
}

impl<'a> Write for Writer<'a> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl<'a> WriteColor for Writer<'a> {
    fn supports_color(&self) -> bool {
        self.0.supports_color()
    }

    fn set_color(&mut self, spec: &ColorSpec) -> std::io::Result<()> {
        self.0.set_color(spec)
    }

    fn reset(&mut self) -> std::io::Result<()> {
        self.0.reset()
    }
}

fn print_stack_header<W: WriteColor>(writer: &mut W, stack: &CloudFormationStack) -> Result<()> {
    write!(writer, "{}", stack.stack_name()).wrap_err("printing stack name")?;
    if let Some(status) = stack.status() {
        write!(writer, " | ").wrap_err("printing pipe character")?;
        writer
            .set_color(&status.color_spec())
            .wrap_err("setting color")?;
        write!(writer, "{}", status).wrap_err("printing status")?;
        writer.reset().wrap_err("resetting colour")?;
    }
    writeln!(writer).wrap_err("printing end of header")?;
    Ok(())
}

fn operations_table(operations: &[HotswapOperation]) -> String {
    let mut table = Table::new();
    table.add_row(Row::new(vec![
        TableCell::new("Logical ID"),
        TableCell::new("Type"),
        TableCell::new("Change"),
        TableCell::new("Target"),
    ]));
    for operation in operations {
        table.add_row(Row::new(vec![
            TableCell::new(operation.logical_id()),
            TableCell::new(operation.resource_type()),
            TableCell::new(operation.change()),
            TableCell::new(operation.target()),
        ]));
    }
    table.render()
}

pub(crate) fn print_plan<W: WriteColor>(
    writer: &mut W,
    stack: &CloudFormationStack,
    operations: &[HotswapOperation],
) -> Result<()> {
    print_stack_header(writer, stack)?;
    if operations.is_empty() {
        writeln!(writer, "nothing to hotswap").wrap_err("printing plan")?;
        return Ok(());
    }
    writeln!(writer, "would hotswap:").wrap_err("printing plan")?;
    write!(writer, "{}", operations_table(operations)).wrap_err("printing table")?;
    Ok(())
}

pub(crate) fn print_result<W: WriteColor>(
    writer: &mut W,
    stack: &CloudFormationStack,
    result: &DeployStackResult,
    elapsed: Duration,
) -> Result<()> {
    print_stack_header(writer, stack)?;
    if result.no_op {
        writeln!(writer, "no changes").wrap_err("printing result")?;
        return Ok(());
    }

    write!(writer, "{}", operations_table(&result.operations)).wrap_err("printing table")?;
    let mut spec = ColorSpec::new();
    spec.set_fg(Some(Color::Green));
    writer.set_color(&spec).wrap_err("setting color")?;
    write!(
        writer,
        "hotswapped {} resource(s)",
        result.operations.len()
    )
    .wrap_err("printing summary")?;
    writer.reset().wrap_err("resetting colour")?;
    writeln!(
        writer,
        " in {}",
        humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64))
    )
    .wrap_err("printing elapsed time")?;

    let mut outputs: Vec<_> = result.outputs.iter().collect();
    outputs.sort();
    for (key, value) in outputs {
        writeln!(writer, "{} = {}", key, value).wrap_err("printing output")?;
    }
    Ok(())
}

pub(crate) fn print_fallback<W: WriteColor>(writer: &mut W, stack_name: &str) -> Result<()> {
    let mut spec = ColorSpec::new();
    spec.set_fg(Some(Color::Yellow));
    writer.set_color(&spec).wrap_err("setting color")?;
    write!(writer, "{}", stack_name).wrap_err("printing stack name")?;
    writer.reset().wrap_err("resetting colour")?;
    writeln!(
        writer,
        ": changes cannot be hotswapped, a full CloudFormation deployment is required"
    )
    .wrap_err("printing fallback")?;
    Ok(())
}
