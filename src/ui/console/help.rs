pub const HELP: &str = r#"
Available debugger commands:

r, run                                  -- start listening, take the next waiting session or continue to the next breakpoint
s, step                                 -- step into the next statement
n, next                                 -- step over function calls
finish                                  -- run until the current function returns
up, down                                -- move focus towards the innermost or the outermost stack frame
f, frame <number>                       -- select a stack frame
b, break <file:line> [<expression>]     -- add a breakpoint, or remove the breakpoint set at this line
delete <number>                         -- remove a breakpoint by its number
breakpoints                             -- list breakpoints
clear                                   -- remove all breakpoints
restore                                 -- add back breakpoints removed by the last `clear`
e, eval <expression>                    -- evaluate an expression in the current stack frame
p, print <name>                         -- show a variable of the current stack frame
expand <name> <line>                    -- show children of a variable in place of a line of variables view
context                                 -- show variables of the current stack frame
watch <>|<name>                         -- toggle a variable shown after each step, without a name toggle the context view
autoeval <expression>                   -- toggle an expression evaluated after each step
watches                                 -- list watched variables and expressions
feature <name> <value>                  -- set an engine feature, like max_depth or max_children
listen                                  -- start listening for engines
stop                                    -- stop listening and detach from waiting engines
detach                                  -- let the current script finish without debugger
trace on|off                            -- log raw protocol traffic
h, help                                 -- show help
q, quit                                 -- detach current session, or stop listening and exit if there is none
"#;
