mod coroutine;
