use super::loader::MethodTarget;
use super::{DynamicLoader, Exception, LoadedClass, LoadedMethod, Value};
use crate::jvm::{Instruction, InvokeType};

/// Deepest chain of nested calls to generated methods before a `StackOverflowError`
const MAX_CALL_DEPTH: usize = 512;

/// Interpreter for verified method bodies
///
/// Since verified code never branches, each frame just runs its instructions top to bottom until
/// it hits a terminator.
pub(crate) struct Interpreter<'l> {
    loader: &'l DynamicLoader,
    depth: usize,
}

impl<'l> Interpreter<'l> {
    pub fn new(loader: &'l DynamicLoader) -> Interpreter<'l> {
        Interpreter { loader, depth: 0 }
    }

    /// Run a method of a loaded class
    ///
    /// The receiver is `None` for static methods.
    pub fn invoke(
        &mut self,
        class: &LoadedClass,
        method: &LoadedMethod,
        receiver: Option<Value>,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Exception> {
        if method.code.is_empty() {
            return Err(Exception::Internal(format!(
                "{}.{} has no code",
                class.name,
                method.display_name()
            )));
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Exception::StackOverflow);
        }

        let mut locals: Vec<Value> = Vec::with_capacity(method.max_locals as usize);
        locals.extend(receiver);
        locals.extend(args);
        locals.resize(method.max_locals as usize, Value::Null);
        let mut stack: Vec<Value> = Vec::with_capacity(method.max_stack as usize);

        self.depth += 1;
        let result = self.run(class, method, &mut locals, &mut stack);
        self.depth -= 1;
        result
    }

    fn run(
        &mut self,
        class: &LoadedClass,
        method: &LoadedMethod,
        locals: &mut [Value],
        stack: &mut Vec<Value>,
    ) -> Result<Option<Value>, Exception> {
        let loader = self.loader;
        for insn in &method.code {
            log::trace!("{}.{}: {}", class.name, method.name, insn);
            match insn {
                Instruction::ALoad(slot) => stack.push(local(locals, *slot)?.clone()),
                Instruction::AStore(slot) => {
                    let value = pop(stack)?;
                    *local(locals, *slot)? = value;
                }
                Instruction::Pop => {
                    pop(stack)?;
                }
                Instruction::Dup => {
                    let value = pop(stack)?;
                    stack.push(value.clone());
                    stack.push(value);
                }
                Instruction::Ldc(string) => stack.push(Value::string(string)),
                Instruction::GetStatic(field) => {
                    let value = loader
                        .resolve_static_field(None, &class.name, field)
                        .map_err(Exception::Linkage)?;
                    stack.push(value.clone());
                }
                Instruction::Invoke(invoke_type, method_ref) => {
                    let arg_count = method_ref.descriptor.parameters.len();
                    if stack.len() < arg_count {
                        return Err(underflow());
                    }
                    let args = stack.split_off(stack.len() - arg_count);
                    let receiver = match invoke_type {
                        InvokeType::Static => None,
                        InvokeType::Special | InvokeType::Virtual => match pop(stack)? {
                            Value::Null => {
                                return Err(Exception::NullPointer(format!(
                                    "cannot invoke {} on null",
                                    method_ref
                                )))
                            }
                            receiver => Some(receiver),
                        },
                    };

                    let target = loader
                        .resolve_method(None, &class.name, method_ref)
                        .map_err(Exception::Linkage)?;
                    let returned = match target {
                        MethodTarget::Host(host_method) => {
                            (host_method.implementation)(receiver.as_ref(), &args)?
                        }
                        MethodTarget::Loaded(target_class, target_method) => {
                            self.invoke(target_class, target_method, receiver, args)?
                        }
                    };
                    stack.extend(returned);
                }
                Instruction::Return => return Ok(None),
                Instruction::AReturn => return Ok(Some(pop(stack)?)),
                Instruction::AThrow => {
                    return match pop(stack)? {
                        Value::Null => Err(Exception::NullPointer(String::from(
                            "cannot throw null",
                        ))),
                        thrown => Err(Exception::Thrown(thrown)),
                    }
                }
            }
        }
        Err(Exception::Internal(String::from(
            "execution fell off the end of the code",
        )))
    }
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, Exception> {
    stack.pop().ok_or_else(underflow)
}

fn underflow() -> Exception {
    Exception::Internal(String::from("operand stack underflow"))
}

fn local(locals: &mut [Value], slot: u8) -> Result<&mut Value, Exception> {
    locals
        .get_mut(slot as usize)
        .ok_or_else(|| Exception::Internal(format!("local {} out of range", slot)))
}
